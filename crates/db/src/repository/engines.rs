//! Engine catalog operations. Engines are shared by all tenants.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::EngineRecord, DbError};

pub async fn insert_engine(pool: &PgPool, engine: &EngineRecord) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO engines (id, name, base_url, run_path, is_active, last_heartbeat, registered_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(engine.id)
    .bind(&engine.name)
    .bind(&engine.base_url)
    .bind(&engine.run_path)
    .bind(engine.is_active)
    .bind(engine.last_heartbeat)
    .bind(engine.registered_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// All engines, oldest registration first.
pub async fn list_engines(pool: &PgPool) -> Result<Vec<EngineRecord>, DbError> {
    let rows = sqlx::query_as::<_, EngineRecord>(
        r#"
        SELECT id, name, base_url, run_path, is_active, last_heartbeat, registered_at
        FROM engines
        ORDER BY registered_at ASC, name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns `DbError::NotFound` if no row was updated.
pub async fn set_engine_active(pool: &PgPool, engine_id: Uuid, active: bool) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE engines SET is_active = $1 WHERE id = $2")
        .bind(active)
        .bind(engine_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

pub async fn touch_heartbeat(pool: &PgPool, engine_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE engines SET last_heartbeat = $1 WHERE id = $2")
        .bind(at)
        .bind(engine_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
