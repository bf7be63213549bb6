//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use dispatch::DispatchError;

/// Errors produced by the scheduler core (catalog, stages, aggregation).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Dispatch classification ------

    /// The catalog has no engine eligible for dispatch. Fatal, never retried.
    #[error("no active engine")]
    NoActiveEngine,

    /// Malformed input (fatal) or engine execution error (recoverable).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    // ------ Lookup / validation ------

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("engine {0} not found")]
    EngineNotFound(Uuid),

    /// A submitted workflow or engine registration was rejected.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// Whether the retry policy may try again after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Dispatch(e) => e.is_recoverable(),
            _ => false,
        }
    }
}
