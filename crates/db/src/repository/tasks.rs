//! Task operations.
//!
//! Status changes are conditional `UPDATE … WHERE status …` statements so
//! that concurrent finalize stages for sibling tasks cannot clobber each other.

use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::{
    models::{TaskCompletion, TaskRecord, TaskRow, TenantScope},
    DbError,
};

const TASK_COLUMNS: &str = "id, workflow_id, position, slug, status, tenant_scope, execution_profile, \
    input, output, error, assigned_engine_id, queue_job_id, retry_count, created_at, updated_at";

pub async fn insert_task<'e>(exec: impl PgExecutor<'e>, task: &TaskRecord) -> Result<(), DbError> {
    let retry_count = i32::try_from(task.retry_count)
        .map_err(|_| DbError::InvalidTransition(format!("retry_count overflow on task {}", task.id)))?;

    sqlx::query(
        r#"
        INSERT INTO tasks
            (id, workflow_id, position, slug, status, tenant_scope, execution_profile,
             input, output, error, assigned_engine_id, queue_job_id, retry_count, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(task.id)
    .bind(task.workflow_id)
    .bind(task.position)
    .bind(&task.slug)
    .bind(task.status.as_str())
    .bind(task.tenant_scope.as_str())
    .bind(task.execution_profile.as_str())
    .bind(&task.input)
    .bind(&task.output)
    .bind(&task.error)
    .bind(task.assigned_engine_id)
    .bind(&task.queue_job_id)
    .bind(retry_count)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(exec)
    .await?;

    Ok(())
}

pub async fn get_task<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    task_id: Uuid,
) -> Result<Option<TaskRecord>, DbError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_scope = $1 AND id = $2");
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(scope.as_str())
        .bind(task_id)
        .fetch_optional(exec)
        .await?;

    row.map(TaskRecord::try_from).transpose()
}

/// Tasks of one workflow ordered by position (execution order).
pub async fn list_tasks<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    workflow_id: Uuid,
) -> Result<Vec<TaskRecord>, DbError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_scope = $1 AND workflow_id = $2 \
         ORDER BY position ASC, created_at ASC"
    );
    let rows = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(scope.as_str())
        .bind(workflow_id)
        .fetch_all(exec)
        .await?;

    rows.into_iter().map(TaskRecord::try_from).collect()
}

pub async fn set_queue_job_id<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    task_id: Uuid,
    job_id: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE tasks SET queue_job_id = $1, updated_at = now() WHERE tenant_scope = $2 AND id = $3",
    )
    .bind(job_id)
    .bind(scope.as_str())
    .bind(task_id)
    .execute(exec)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// `pending -> running`; `false` if the task was not pending.
pub async fn mark_running<'e>(exec: impl PgExecutor<'e>, scope: &TenantScope, task_id: Uuid) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'running', updated_at = now()
        WHERE tenant_scope = $1 AND id = $2 AND status = 'pending'
        "#,
    )
    .bind(scope.as_str())
    .bind(task_id)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn record_attempt<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    task_id: Uuid,
    engine_id: Uuid,
    retry_count: u32,
) -> Result<(), DbError> {
    let retry_count = i32::try_from(retry_count)
        .map_err(|_| DbError::InvalidTransition(format!("retry_count overflow on task {task_id}")))?;

    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET assigned_engine_id = $1, retry_count = $2, updated_at = now()
        WHERE tenant_scope = $3 AND id = $4 AND status = 'running'
        "#,
    )
    .bind(engine_id)
    .bind(retry_count)
    .bind(scope.as_str())
    .bind(task_id)
    .execute(exec)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition(format!(
            "task {task_id} is not running; attempt not recorded"
        )));
    }

    Ok(())
}

/// Terminal write; `false` when the task was already terminal.
pub async fn finalize<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    task_id: Uuid,
    completion: &TaskCompletion,
) -> Result<bool, DbError> {
    if !completion.status.is_terminal() {
        return Err(DbError::InvalidTransition(format!(
            "cannot finalize task {task_id} as {}",
            completion.status
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = $1, output = $2, error = $3, updated_at = now()
        WHERE tenant_scope = $4 AND id = $5 AND status IN ('pending', 'running')
        "#,
    )
    .bind(completion.status.as_str())
    .bind(&completion.output)
    .bind(&completion.error)
    .bind(scope.as_str())
    .bind(task_id)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}
