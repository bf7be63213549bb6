//! Task execution stages.
//!
//! `TaskExecutor` owns the two halves of a task's pipeline:
//! 1. **execute** (stage A): tags the task `running`, validates its payload,
//!    selects an engine and dispatches under the retry policy. Every error is
//!    caught and classified here; the stage yields a terminal completion.
//! 2. **finalize** (stage B): persists the completion exactly once and runs
//!    the workflow aggregator. It never fails: if the structured completion
//!    cannot be written, a generic failure is written instead.
//!
//! Neither stage knows about lanes; the queue crate decides where they run.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::{Status, Store, TaskCompletion, TenantScope};
use dispatch::{DispatchPayload, Dispatcher};

use crate::{EngineCatalog, EngineError, RetryPolicy, WorkflowAggregator};

/// Error text written when a completion could not be persisted as produced.
pub const FINALIZE_FALLBACK_ERROR: &str = "task finalization failed; original outcome could not be persisted";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    /// Per-attempt HTTP timeout handed to the dispatcher.
    pub dispatch_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            dispatch_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// Result of the execute stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// The task was not `pending`; nothing was dispatched and there is
    /// nothing to finalize.
    Skipped { task_id: Uuid, status: Status },
    /// The task ran (or failed fatally) and must be finalized.
    Completed {
        task_id: Uuid,
        workflow_id: Uuid,
        completion: TaskCompletion,
        attempts: u32,
    },
}

/// What the finalize stage did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub task_id: Uuid,
    /// `false` when the task was already terminal or nothing could be written.
    pub persisted: bool,
    /// Terminal status on record after the stage, if it could be read back.
    pub task_status: Option<Status>,
    /// Workflow transition performed by this stage's aggregation.
    pub workflow_transition: Option<Status>,
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<dyn Store>,
    catalog: EngineCatalog,
    dispatcher: Arc<dyn Dispatcher>,
    aggregator: WorkflowAggregator,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: EngineCatalog,
        dispatcher: Arc<dyn Dispatcher>,
        config: ExecutorConfig,
    ) -> Self {
        let aggregator = WorkflowAggregator::new(store.clone());
        Self { store, catalog, dispatcher, aggregator, config }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn aggregator(&self) -> &WorkflowAggregator {
        &self.aggregator
    }

    pub fn catalog(&self) -> &EngineCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Stage A: dispatch the task with retries.
    ///
    /// # Errors
    /// Only store failures and unknown tasks escape; dispatch failures of any
    /// kind are folded into a `failure` completion.
    #[instrument(skip(self), fields(tenant = %scope))]
    pub async fn execute(&self, scope: &TenantScope, task_id: Uuid) -> Result<ExecuteOutcome, EngineError> {
        let task = self
            .store
            .get_task(scope, task_id)
            .await?
            .ok_or(EngineError::TaskNotFound(task_id))?;

        if !self.store.mark_task_running(scope, task_id).await? {
            warn!("task {} is {}, not pending; skipping dispatch", task_id, task.status);
            return Ok(ExecuteOutcome::Skipped { task_id, status: task.status });
        }
        // Covers tasks enqueued on their own, outside a workflow chain.
        self.store
            .transition_workflow(scope, task.workflow_id, &[Status::Pending], Status::Running)
            .await?;
        info!("task {} ({}) running", task_id, task.slug);

        let (completion, attempts) = match DispatchPayload::from_task(&task) {
            Err(e) => {
                error!("task {} has malformed input: {}", task_id, e);
                (TaskCompletion::failure(e.to_string()), 0)
            }
            Ok(_) => self.dispatch_with_retry(scope, &task).await?,
        };

        Ok(ExecuteOutcome::Completed {
            task_id,
            workflow_id: task.workflow_id,
            completion,
            attempts,
        })
    }

    async fn dispatch_with_retry(
        &self,
        scope: &TenantScope,
        task: &db::TaskRecord,
    ) -> Result<(TaskCompletion, u32), EngineError> {
        let policy = self.config.retry;
        let mut attempts = 0u32;

        loop {
            let engine = match self.catalog.select_engine().await {
                Ok(engine) => engine,
                Err(EngineError::NoActiveEngine) => {
                    error!("task {} cannot be dispatched: no active engine", task.id);
                    return Ok((TaskCompletion::failure(EngineError::NoActiveEngine.to_string()), attempts));
                }
                Err(other) => return Err(other),
            };

            self.store.record_attempt(scope, task.id, engine.id, attempts).await?;
            attempts += 1;

            let result = self
                .dispatcher
                .run_task(task, &engine, self.config.dispatch_timeout)
                .await;

            match result.into_result() {
                Ok(output) => {
                    info!("task {} succeeded on engine '{}' (attempt {})", task.id, engine.name, attempts);
                    return Ok((TaskCompletion::success(output), attempts));
                }
                Err(e) if e.is_recoverable() && policy.allows_another(attempts) => {
                    let delay = policy.delay_for(attempts - 1);
                    warn!(
                        "task {} recoverable error (attempt {}/{}), retrying in {:?}: {}",
                        task.id, attempts, policy.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("task {} failed after {} attempt(s): {}", task.id, attempts, e);
                    return Ok((TaskCompletion::failure(e.to_string()), attempts));
                }
            }
        }
    }

    /// Stage B: persist the completion and aggregate the workflow.
    #[instrument(skip(self, completion), fields(tenant = %scope, status = %completion.status))]
    pub async fn finalize(&self, scope: &TenantScope, task_id: Uuid, completion: TaskCompletion) -> FinalizeReport {
        let persisted = match self.store.finalize_task(scope, task_id, &completion).await {
            Ok(applied) => applied,
            Err(e) => {
                error!("could not persist outcome of task {}: {}", task_id, e);
                let fallback = TaskCompletion::failure(FINALIZE_FALLBACK_ERROR);
                match self.store.finalize_task(scope, task_id, &fallback).await {
                    Ok(applied) => applied,
                    Err(e) => {
                        error!("could not persist fallback failure for task {}: {}", task_id, e);
                        false
                    }
                }
            }
        };
        if !persisted {
            warn!("task {} was already terminal or could not be finalized", task_id);
        }

        let task = match self.store.get_task(scope, task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                error!("task {} vanished during finalize", task_id);
                return FinalizeReport { task_id, persisted, task_status: None, workflow_transition: None };
            }
            Err(e) => {
                error!("could not reload task {} for aggregation: {}", task_id, e);
                return FinalizeReport { task_id, persisted, task_status: None, workflow_transition: None };
            }
        };

        // Runs even when this stage did not write: a previous finalize may have
        // persisted the task and died before aggregating.
        let workflow_transition = if task.status.is_terminal() {
            match self.aggregator.on_task_finalized(&task).await {
                Ok(moved) => moved,
                Err(e) => {
                    error!("aggregation for task {} failed: {}", task_id, e);
                    None
                }
            }
        } else {
            None
        };

        FinalizeReport {
            task_id,
            persisted,
            task_status: Some(task.status),
            workflow_transition,
        }
    }

    /// Stage A followed directly by stage B, for callers without lanes.
    pub async fn run_to_completion(&self, scope: &TenantScope, task_id: Uuid) -> Option<FinalizeReport> {
        let completion = match self.execute(scope, task_id).await {
            Ok(ExecuteOutcome::Completed { completion, .. }) => completion,
            Ok(ExecuteOutcome::Skipped { .. }) => return None,
            Err(e) => TaskCompletion::failure(e.to_string()),
        };
        Some(self.finalize(scope, task_id, completion).await)
    }
}
