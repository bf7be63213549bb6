use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use db::TaskRecord;
use queue::JobTicket;

use crate::{ApiError, AppState, Tenant};

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Tenant(scope): Tenant,
) -> Result<Json<TaskRecord>, ApiError> {
    match state.router.store().get_task(&scope, id).await? {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("task {id} not found"))),
    }
}

pub async fn run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Tenant(scope): Tenant,
) -> Result<(StatusCode, Json<JobTicket>), ApiError> {
    let handle = state.router.enqueue_task_run(&scope, id).await?;
    Ok((StatusCode::ACCEPTED, Json(handle.ticket)))
}
