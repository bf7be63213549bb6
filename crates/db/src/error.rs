//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A conditional write kept losing to concurrent writers.
    #[error("persistence conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// A stored value could not be mapped back onto a domain type.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}
