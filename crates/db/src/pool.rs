//! Postgres pool set-up and embedded migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::{DbError, PgStore};

pub type DbPool = PgPool;

/// Connect a pool of at most `max_connections`.
///
/// Lane workers and API handlers share it, so a short acquire timeout makes
/// an exhausted pool show up as an error instead of a hung stage.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!("connecting to database (max_connections={})", max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// [`create_pool`] wrapped in a [`PgStore`].
pub async fn connect_store(database_url: &str, max_connections: u32) -> Result<PgStore, DbError> {
    Ok(PgStore::new(create_pool(database_url, max_connections).await?))
}

/// Apply the engines/workflows/tasks schema from `migrations/` at the
/// workspace root, embedded at build time.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("running database migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
