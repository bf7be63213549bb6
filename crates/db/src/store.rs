//! The `Store` trait: every read and write the scheduler performs.
//!
//! Status changes are conditional writes: each returns `true` only when this
//! call performed the transition, so racing finalize stages for sibling tasks
//! can never overwrite one another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{EngineRecord, Status, TaskCompletion, TaskRecord, TenantScope, WorkflowRecord};
use crate::DbError;

#[async_trait]
pub trait Store: Send + Sync {
    // === Engine catalog (global) ===

    async fn insert_engine(&self, engine: &EngineRecord) -> Result<(), DbError>;

    /// All engines in registration order.
    async fn list_engines(&self) -> Result<Vec<EngineRecord>, DbError>;

    /// Returns [`DbError::NotFound`] for an unknown engine.
    async fn set_engine_active(&self, engine_id: Uuid, active: bool) -> Result<(), DbError>;

    async fn touch_engine_heartbeat(&self, engine_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError>;

    // === Workflows and tasks (tenant-scoped) ===

    /// Persist a workflow together with its tasks, all or nothing.
    async fn insert_workflow(&self, workflow: &WorkflowRecord, tasks: &[TaskRecord]) -> Result<(), DbError>;

    async fn get_workflow(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<Option<WorkflowRecord>, DbError>;

    async fn get_task(&self, scope: &TenantScope, task_id: Uuid) -> Result<Option<TaskRecord>, DbError>;

    /// Tasks of a workflow in execution order.
    async fn list_tasks(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<Vec<TaskRecord>, DbError>;

    async fn set_queue_job_id(&self, scope: &TenantScope, task_id: Uuid, job_id: &str) -> Result<(), DbError>;

    /// `pending -> running`.
    async fn mark_task_running(&self, scope: &TenantScope, task_id: Uuid) -> Result<bool, DbError>;

    /// Record the engine and retry counter of a dispatch attempt on a running task.
    async fn record_attempt(
        &self,
        scope: &TenantScope,
        task_id: Uuid,
        engine_id: Uuid,
        retry_count: u32,
    ) -> Result<(), DbError>;

    /// `pending | running -> success | failure`, at most once per task.
    async fn finalize_task(
        &self,
        scope: &TenantScope,
        task_id: Uuid,
        completion: &TaskCompletion,
    ) -> Result<bool, DbError>;

    /// Move a workflow to `to` if its current status is one of `from`.
    async fn transition_workflow(
        &self,
        scope: &TenantScope,
        workflow_id: Uuid,
        from: &[Status],
        to: Status,
    ) -> Result<bool, DbError>;

    /// Move a non-terminal workflow to `success` when it has at least one task
    /// and every task is `success`, evaluated in the same atomic write.
    async fn complete_workflow_if_settled(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<bool, DbError>;
}
