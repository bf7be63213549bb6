//! Workflow aggregator: derives workflow status from its tasks.
//!
//! `pending --(enqueue)--> running --(all tasks success)--> success`
//! `running --(any task failure)--> failure`
//!
//! Each transition is a single conditional write in the store, so concurrent
//! finalize stages can invoke the aggregator for sibling tasks without a
//! read-modify-write race, and re-invoking it for an already-finalized task
//! changes nothing.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use db::{DbError, Status, Store, TaskRecord, TenantScope};

use crate::EngineError;

const NON_TERMINAL: [Status; 2] = [Status::Pending, Status::Running];

#[derive(Clone)]
pub struct WorkflowAggregator {
    store: Arc<dyn Store>,
}

impl WorkflowAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// React to a task reaching a terminal state.
    ///
    /// Returns the status the workflow moved to, or `None` if this call
    /// performed no transition.
    #[instrument(skip(self, task), fields(task_id = %task.id, workflow_id = %task.workflow_id))]
    pub async fn on_task_finalized(&self, task: &TaskRecord) -> Result<Option<Status>, EngineError> {
        let scope = &task.tenant_scope;
        let moved = match task.status {
            Status::Failure => {
                self.store
                    .transition_workflow(scope, task.workflow_id, &NON_TERMINAL, Status::Failure)
                    .await
                    .map_err(|e| workflow_not_found(e, task.workflow_id))?
                    .then_some(Status::Failure)
            }
            Status::Success => self
                .store
                .complete_workflow_if_settled(scope, task.workflow_id)
                .await
                .map_err(|e| workflow_not_found(e, task.workflow_id))?
                .then_some(Status::Success),
            other => {
                warn!("aggregator invoked for non-terminal task ({})", other);
                None
            }
        };

        match moved {
            Some(status) => info!("workflow {} -> {}", task.workflow_id, status),
            None => debug!("workflow {} unchanged", task.workflow_id),
        }
        Ok(moved)
    }

    /// `pending -> running`, performed when a workflow's chain is enqueued.
    pub async fn mark_running(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<bool, EngineError> {
        self.store
            .transition_workflow(scope, workflow_id, &[Status::Pending], Status::Running)
            .await
            .map_err(|e| workflow_not_found(e, workflow_id))
    }

    /// Force a non-terminal workflow to `failure`.
    ///
    /// In-flight tasks still finish and keep their own outcome; their
    /// finalize stage observes the terminal workflow and leaves it alone.
    pub async fn cancel(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<bool, EngineError> {
        let cancelled = self
            .store
            .transition_workflow(scope, workflow_id, &NON_TERMINAL, Status::Failure)
            .await
            .map_err(|e| workflow_not_found(e, workflow_id))?;
        if cancelled {
            info!("workflow {} cancelled", workflow_id);
        }
        Ok(cancelled)
    }
}

fn workflow_not_found(err: DbError, workflow_id: Uuid) -> EngineError {
    match err {
        DbError::NotFound => EngineError::WorkflowNotFound(workflow_id),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::{ExecutionProfile, MemoryStore, TaskCompletion, WorkflowRecord};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        aggregator: WorkflowAggregator,
        workflow: WorkflowRecord,
        tasks: Vec<TaskRecord>,
    }

    async fn fixture(n: i32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let workflow = WorkflowRecord::new(TenantScope::new("acme"));
        let tasks: Vec<TaskRecord> = (0..n)
            .map(|i| TaskRecord::new(&workflow, i, format!("t{i}"), ExecutionProfile::Io, json!({})))
            .collect();
        store.insert_workflow(&workflow, &tasks).await.unwrap();
        let aggregator = WorkflowAggregator::new(store.clone());
        aggregator.mark_running(&workflow.tenant_scope, workflow.id).await.unwrap();
        Fixture { store, aggregator, workflow, tasks }
    }

    impl Fixture {
        async fn finalize(&self, idx: usize, completion: TaskCompletion) -> TaskRecord {
            let scope = &self.workflow.tenant_scope;
            self.store.finalize_task(scope, self.tasks[idx].id, &completion).await.unwrap();
            self.store.get_task(scope, self.tasks[idx].id).await.unwrap().unwrap()
        }

        async fn workflow_status(&self) -> Status {
            self.store
                .get_workflow(&self.workflow.tenant_scope, self.workflow.id)
                .await
                .unwrap()
                .unwrap()
                .status
        }
    }

    #[tokio::test]
    async fn success_waits_for_every_sibling() {
        let fx = fixture(3).await;

        let t0 = fx.finalize(0, TaskCompletion::success(json!({}))).await;
        assert_eq!(fx.aggregator.on_task_finalized(&t0).await.unwrap(), None);
        let t2 = fx.finalize(2, TaskCompletion::success(json!({}))).await;
        assert_eq!(fx.aggregator.on_task_finalized(&t2).await.unwrap(), None);
        assert_eq!(fx.workflow_status().await, Status::Running);

        let t1 = fx.finalize(1, TaskCompletion::success(json!({}))).await;
        assert_eq!(fx.aggregator.on_task_finalized(&t1).await.unwrap(), Some(Status::Success));
        assert_eq!(fx.workflow_status().await, Status::Success);
    }

    #[tokio::test]
    async fn aggregation_is_idempotent() {
        let fx = fixture(1).await;
        let t0 = fx.finalize(0, TaskCompletion::success(json!({}))).await;

        assert_eq!(fx.aggregator.on_task_finalized(&t0).await.unwrap(), Some(Status::Success));
        for _ in 0..3 {
            assert_eq!(fx.aggregator.on_task_finalized(&t0).await.unwrap(), None);
            assert_eq!(fx.workflow_status().await, Status::Success);
        }
    }

    #[tokio::test]
    async fn failure_is_set_once_and_never_reverted() {
        let fx = fixture(3).await;

        let t0 = fx.finalize(0, TaskCompletion::success(json!({}))).await;
        fx.aggregator.on_task_finalized(&t0).await.unwrap();
        let t1 = fx.finalize(1, TaskCompletion::failure("HTTP 500")).await;
        assert_eq!(fx.aggregator.on_task_finalized(&t1).await.unwrap(), Some(Status::Failure));
        assert_eq!(fx.aggregator.on_task_finalized(&t1).await.unwrap(), None);

        let t2 = fx.finalize(2, TaskCompletion::success(json!({}))).await;
        assert_eq!(fx.aggregator.on_task_finalized(&t2).await.unwrap(), None);
        assert_eq!(fx.workflow_status().await, Status::Failure);
    }

    #[tokio::test]
    async fn concurrent_finalizations_transition_exactly_once() {
        let fx = fixture(8).await;
        let mut finalized = Vec::new();
        for i in 0..8 {
            finalized.push(fx.finalize(i, TaskCompletion::success(json!({}))).await);
        }

        let handles: Vec<_> = finalized
            .into_iter()
            .map(|task| {
                let aggregator = fx.aggregator.clone();
                tokio::spawn(async move { aggregator.on_task_finalized(&task).await.unwrap() })
            })
            .collect();

        let mut transitions = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
        assert_eq!(fx.workflow_status().await, Status::Success);
    }

    #[tokio::test]
    async fn cancel_fails_a_running_workflow_once() {
        let fx = fixture(2).await;
        let scope = &fx.workflow.tenant_scope;
        assert!(fx.aggregator.cancel(scope, fx.workflow.id).await.unwrap());
        assert!(!fx.aggregator.cancel(scope, fx.workflow.id).await.unwrap());

        // The in-flight task still records its own success.
        let t0 = fx.finalize(0, TaskCompletion::success(json!({"kept": true}))).await;
        let t1 = fx.finalize(1, TaskCompletion::success(json!({}))).await;
        fx.aggregator.on_task_finalized(&t0).await.unwrap();
        fx.aggregator.on_task_finalized(&t1).await.unwrap();
        assert_eq!(fx.workflow_status().await, Status::Failure);
        assert_eq!(t0.output, Some(json!({"kept": true})));
    }

    #[tokio::test]
    async fn unknown_workflow_is_reported() {
        let fx = fixture(0).await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            fx.aggregator.cancel(&fx.workflow.tenant_scope, missing).await,
            Err(EngineError::WorkflowNotFound(id)) if id == missing
        ));
    }
}
