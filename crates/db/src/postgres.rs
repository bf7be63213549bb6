//! Postgres-backed [`Store`].
//!
//! Delegates to the repository functions and retries statements that lose a
//! serialization or deadlock race, so callers never observe a persistence
//! conflict as a task failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::models::{EngineRecord, Status, TaskCompletion, TaskRecord, TenantScope, WorkflowRecord};
use crate::repository::{engines, tasks, workflows};
use crate::{DbError, DbPool, Store};

/// Attempts made before a conflict is surfaced as [`DbError::Conflict`].
const CONFLICT_ATTEMPTS: u32 = 5;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// SQLSTATE 40001 (serialization_failure) or 40P01 (deadlock_detected).
fn is_conflict(err: &DbError) -> bool {
    match err {
        DbError::Sqlx(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

async fn retry_on_conflict<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if is_conflict(&err) => {
                if attempt >= CONFLICT_ATTEMPTS {
                    return Err(DbError::Conflict { attempts: attempt });
                }
                warn!("{} lost a write race (attempt {}/{}), retrying", op_name, attempt, CONFLICT_ATTEMPTS);
                tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_engine(&self, engine: &EngineRecord) -> Result<(), DbError> {
        engines::insert_engine(&self.pool, engine).await
    }

    async fn list_engines(&self) -> Result<Vec<EngineRecord>, DbError> {
        engines::list_engines(&self.pool).await
    }

    async fn set_engine_active(&self, engine_id: Uuid, active: bool) -> Result<(), DbError> {
        engines::set_engine_active(&self.pool, engine_id, active).await
    }

    async fn touch_engine_heartbeat(&self, engine_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        engines::touch_heartbeat(&self.pool, engine_id, at).await
    }

    async fn insert_workflow(&self, workflow: &WorkflowRecord, task_rows: &[TaskRecord]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        workflows::insert_workflow(&mut *tx, workflow).await?;
        for task in task_rows {
            tasks::insert_task(&mut *tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_workflow(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<Option<WorkflowRecord>, DbError> {
        workflows::get_workflow(&self.pool, scope, workflow_id).await
    }

    async fn get_task(&self, scope: &TenantScope, task_id: Uuid) -> Result<Option<TaskRecord>, DbError> {
        tasks::get_task(&self.pool, scope, task_id).await
    }

    async fn list_tasks(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<Vec<TaskRecord>, DbError> {
        tasks::list_tasks(&self.pool, scope, workflow_id).await
    }

    async fn set_queue_job_id(&self, scope: &TenantScope, task_id: Uuid, job_id: &str) -> Result<(), DbError> {
        tasks::set_queue_job_id(&self.pool, scope, task_id, job_id).await
    }

    async fn mark_task_running(&self, scope: &TenantScope, task_id: Uuid) -> Result<bool, DbError> {
        retry_on_conflict("mark_task_running", || tasks::mark_running(&self.pool, scope, task_id)).await
    }

    async fn record_attempt(
        &self,
        scope: &TenantScope,
        task_id: Uuid,
        engine_id: Uuid,
        retry_count: u32,
    ) -> Result<(), DbError> {
        retry_on_conflict("record_attempt", || {
            tasks::record_attempt(&self.pool, scope, task_id, engine_id, retry_count)
        })
        .await
    }

    async fn finalize_task(
        &self,
        scope: &TenantScope,
        task_id: Uuid,
        completion: &TaskCompletion,
    ) -> Result<bool, DbError> {
        retry_on_conflict("finalize_task", || tasks::finalize(&self.pool, scope, task_id, completion)).await
    }

    async fn transition_workflow(
        &self,
        scope: &TenantScope,
        workflow_id: Uuid,
        from: &[Status],
        to: Status,
    ) -> Result<bool, DbError> {
        let changed = retry_on_conflict("transition_workflow", || {
            workflows::transition_workflow(&self.pool, scope, workflow_id, from, to)
        })
        .await?;

        if !changed && workflows::get_workflow(&self.pool, scope, workflow_id).await?.is_none() {
            return Err(DbError::NotFound);
        }
        Ok(changed)
    }

    async fn complete_workflow_if_settled(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<bool, DbError> {
        retry_on_conflict("complete_workflow_if_settled", || {
            workflows::complete_if_settled(&self.pool, scope, workflow_id)
        })
        .await
    }
}
