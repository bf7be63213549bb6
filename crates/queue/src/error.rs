//! Queue-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::Status;
use engine::EngineError;

use crate::Lane;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    /// Terminal workflows are never re-run.
    #[error("workflow {workflow_id} already finished with status {status}")]
    AlreadyTerminal { workflow_id: Uuid, status: Status },

    /// Another job already owns this workflow's chain.
    #[error("workflow {0} is already running")]
    AlreadyRunning(Uuid),

    /// The lane's worker loop has stopped accepting jobs.
    #[error("{0} lane is closed")]
    LaneClosed(Lane),

    /// The job was dropped before its chain completed.
    #[error("job {0} was abandoned before completion")]
    Abandoned(Uuid),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
