//! `db` crate: pure persistence layer.
//!
//! Provides the persisted entity shapes, the [`Store`] trait the scheduler
//! writes through, a Postgres implementation backed by a connection pool and
//! repository functions, and an in-memory implementation for tests and
//! single-process deployments. No scheduling logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use models::{EngineRecord, ExecutionProfile, Status, TaskCompletion, TaskRecord, TenantScope, WorkflowRecord};
pub use pool::DbPool;
pub use postgres::PgStore;
pub use store::Store;
