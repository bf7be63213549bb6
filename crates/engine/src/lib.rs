//! `engine` crate: the scheduler core.
//!
//! Engine catalog, retry policy, workflow aggregation, workflow submission
//! and the execute/finalize stages every task passes through. Lane placement
//! and chaining live in the `queue` crate.

pub mod aggregator;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod models;
pub mod retry;

pub use aggregator::WorkflowAggregator;
pub use catalog::EngineCatalog;
pub use error::EngineError;
pub use executor::{ExecuteOutcome, ExecutorConfig, FinalizeReport, TaskExecutor};
pub use models::{load_workflow, TaskSpec, WorkflowSnapshot, WorkflowSpec};
pub use retry::RetryPolicy;
