//! Workflow operations.

use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::{
    models::{Status, TenantScope, WorkflowRecord, WorkflowRow},
    DbError,
};

pub async fn insert_workflow<'e>(exec: impl PgExecutor<'e>, workflow: &WorkflowRecord) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflows (id, tenant_scope, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(workflow.id)
    .bind(workflow.tenant_scope.as_str())
    .bind(workflow.status.as_str())
    .bind(workflow.created_at)
    .bind(workflow.updated_at)
    .execute(exec)
    .await?;

    Ok(())
}

pub async fn get_workflow<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    workflow_id: Uuid,
) -> Result<Option<WorkflowRecord>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT id, status, tenant_scope, created_at, updated_at
        FROM workflows
        WHERE tenant_scope = $1 AND id = $2
        "#,
    )
    .bind(scope.as_str())
    .bind(workflow_id)
    .fetch_optional(exec)
    .await?;

    row.map(WorkflowRecord::try_from).transpose()
}

/// Conditional status change; `true` when this statement performed it.
pub async fn transition_workflow<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    workflow_id: Uuid,
    from: &[Status],
    to: Status,
) -> Result<bool, DbError> {
    let from: Vec<String> = from.iter().map(|s| s.as_str().to_owned()).collect();
    let result = sqlx::query(
        r#"
        UPDATE workflows
        SET status = $1, updated_at = now()
        WHERE tenant_scope = $2 AND id = $3 AND status = ANY($4)
        "#,
    )
    .bind(to.as_str())
    .bind(scope.as_str())
    .bind(workflow_id)
    .bind(from)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Flip a non-terminal workflow to `success` iff it owns tasks and all of them
/// succeeded. The check and the write are one statement.
pub async fn complete_if_settled<'e>(
    exec: impl PgExecutor<'e>,
    scope: &TenantScope,
    workflow_id: Uuid,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflows w
        SET status = 'success', updated_at = now()
        WHERE w.tenant_scope = $1
          AND w.id = $2
          AND w.status IN ('pending', 'running')
          AND EXISTS (
              SELECT 1 FROM tasks t
              WHERE t.tenant_scope = w.tenant_scope AND t.workflow_id = w.id
          )
          AND NOT EXISTS (
              SELECT 1 FROM tasks t
              WHERE t.tenant_scope = w.tenant_scope AND t.workflow_id = w.id
                AND t.status <> 'success'
          )
        "#,
    )
    .bind(scope.as_str())
    .bind(workflow_id)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}
