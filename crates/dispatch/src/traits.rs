//! The `Dispatcher` trait: the contract every engine client must fulfil.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use db::{EngineRecord, Status, TaskRecord};

use crate::DispatchError;

/// Outcome of one dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// `Success` or `Failure`, never a non-terminal status.
    pub status: Status,
    pub output: Option<Value>,
    pub error: String,
    pub engine_id: Uuid,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchResult {
    pub fn success(engine_id: Uuid, dispatched_at: DateTime<Utc>, output: Value) -> Self {
        Self { status: Status::Success, output: Some(output), error: String::new(), engine_id, dispatched_at }
    }

    pub fn failure(engine_id: Uuid, dispatched_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self { status: Status::Failure, output: None, error: error.into(), engine_id, dispatched_at }
    }

    /// A failed dispatch is an engine execution error.
    pub fn into_result(self) -> Result<Value, DispatchError> {
        match self.status {
            Status::Success => Ok(self.output.unwrap_or(Value::Null)),
            _ => Err(DispatchError::EngineExecution(self.error)),
        }
    }
}

/// Pure dispatch primitive: no store side effects.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// POST the task's payload to `engine` and classify the reply.
    ///
    /// Never returns an error: every failure mode is folded into a
    /// `Failure` result carrying the stringified cause.
    async fn run_task(&self, task: &TaskRecord, engine: &EngineRecord, timeout: Duration) -> DispatchResult;
}
