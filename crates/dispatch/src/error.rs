//! Dispatch-level error type.

use thiserror::Error;

/// Errors raised while preparing or performing a dispatch.
///
/// The execute stage uses the variant to decide retry behaviour:
/// - `EngineExecution`: transient; retried under the retry policy.
/// - `MalformedTaskInput`: permanent; the task fails without a call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Network failure, timeout, non-2xx status or unparseable response.
    #[error("engine execution error: {0}")]
    EngineExecution(String),

    /// The task's input cannot be turned into a wire payload.
    #[error("malformed task input: {0}")]
    MalformedTaskInput(String),
}

impl DispatchError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EngineExecution(_))
    }
}
