//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use db::DbError;
use engine::EngineError;
use queue::QueueError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or empty x-tenant-scope header")]
    MissingTenant,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingTenant | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => Self::NotFound(err.to_string()),
            DbError::InvalidTransition(_) => Self::Conflict(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::TaskNotFound(_) | EngineError::WorkflowNotFound(_) | EngineError::EngineNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            EngineError::Invalid(_) => Self::BadRequest(err.to_string()),
            EngineError::Database(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::WorkflowNotFound(_) | QueueError::TaskNotFound(_) => Self::NotFound(err.to_string()),
            QueueError::AlreadyTerminal { .. } | QueueError::AlreadyRunning(_) => Self::Conflict(err.to_string()),
            QueueError::Engine(e) => e.into(),
            QueueError::Database(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::Status;
    use uuid::Uuid;

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(ApiError::MissingTenant.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(DbError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(EngineError::Invalid("bad url".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QueueError::AlreadyTerminal { workflow_id: Uuid::nil(), status: Status::Success }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::from(QueueError::AlreadyRunning(Uuid::nil())).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(QueueError::Engine(EngineError::TaskNotFound(Uuid::nil()))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DbError::Conflict { attempts: 5 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
