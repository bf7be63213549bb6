//! Engine administration. Engines are shared by all tenants, so these routes
//! take no tenant scope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use db::EngineRecord;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterEngineDto {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_run_path")]
    pub run_path: String,
}

fn default_run_path() -> String {
    "/run".into()
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<EngineRecord>>, ApiError> {
    Ok(Json(state.router.catalog().list().await?))
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterEngineDto>,
) -> Result<(StatusCode, Json<EngineRecord>), ApiError> {
    let engine = state
        .router
        .catalog()
        .register(&payload.name, &payload.base_url, &payload.run_path)
        .await?;
    Ok((StatusCode::CREATED, Json(engine)))
}

pub async fn deactivate(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.router.catalog().deactivate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.router.catalog().activate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn heartbeat(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.router.catalog().heartbeat(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
