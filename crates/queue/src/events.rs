//! Stage lifecycle events published by the router.

use tokio::time::Instant;
use uuid::Uuid;

use crate::Lane;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Dispatch with retries.
    Execute,
    /// Persist and aggregate.
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Finished,
}

#[derive(Debug, Clone)]
pub struct StageEvent {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub stage: Stage,
    pub phase: Phase,
    pub lane: Lane,
    /// Dispatch attempts made; only set when an execute stage finishes.
    pub attempts: Option<u32>,
    pub at: Instant,
}
