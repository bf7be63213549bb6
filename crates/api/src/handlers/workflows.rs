use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use engine::{load_workflow, WorkflowSnapshot, WorkflowSpec};
use queue::JobTicket;

use crate::{ApiError, AppState, Tenant};

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    /// `None` when the workflow had no tasks to run.
    pub job: Option<JobTicket>,
}

#[derive(Debug, Serialize)]
pub struct Cancelled {
    pub cancelled: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Tenant(scope): Tenant,
    Json(payload): Json<WorkflowSpec>,
) -> Result<(StatusCode, Json<WorkflowSnapshot>), ApiError> {
    let snapshot = payload.submit(state.router.store().as_ref(), scope).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Tenant(scope): Tenant,
) -> Result<Json<WorkflowSnapshot>, ApiError> {
    let snapshot = load_workflow(state.router.store().as_ref(), &scope, id).await?;
    Ok(Json(snapshot))
}

pub async fn run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Tenant(scope): Tenant,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    // The handle is dropped; progress is observed through the workflow record.
    match state.router.enqueue_workflow_run(&scope, id).await? {
        Some(handle) => Ok((StatusCode::ACCEPTED, Json(RunAccepted { job: Some(handle.ticket) }))),
        None => Ok((StatusCode::OK, Json(RunAccepted { job: None }))),
    }
}

pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Tenant(scope): Tenant,
) -> Result<Json<Cancelled>, ApiError> {
    let cancelled = state.router.cancel_workflow(&scope, id).await?;
    Ok(Json(Cancelled { cancelled }))
}
