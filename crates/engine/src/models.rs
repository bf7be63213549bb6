//! Workflow submission models.
//!
//! A submitted [`WorkflowSpec`] becomes one `pending` workflow record and one
//! `pending` task record per [`TaskSpec`]. List order is execution order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use db::{ExecutionProfile, Store, TaskRecord, TenantScope, WorkflowRecord};

use crate::EngineError;

/// One unit of work inside a submitted workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Identifies the kind of work the engine should run.
    pub slug: String,
    #[serde(default)]
    pub execution_profile: ExecutionProfile,
    /// Opaque input; `config` and `data` are forwarded to the engine.
    #[serde(default = "empty_object")]
    pub input: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl TaskSpec {
    pub fn new(slug: impl Into<String>, execution_profile: ExecutionProfile, input: Value) -> Self {
        Self { slug: slug.into(), execution_profile, input }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub tasks: Vec<TaskSpec>,
}

/// A persisted workflow and its tasks in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow: WorkflowRecord,
    pub tasks: Vec<TaskRecord>,
}

impl WorkflowSpec {
    pub fn new(tasks: Vec<TaskSpec>) -> Self {
        Self { tasks }
    }

    /// Persist the workflow and its tasks, all `pending`.
    ///
    /// # Errors
    /// [`EngineError::Invalid`] when a task has a blank slug.
    pub async fn submit(self, store: &dyn Store, scope: TenantScope) -> Result<WorkflowSnapshot, EngineError> {
        if let Some(idx) = self.tasks.iter().position(|t| t.slug.trim().is_empty()) {
            return Err(EngineError::Invalid(format!("task #{idx} has an empty slug")));
        }
        let task_count = i32::try_from(self.tasks.len())
            .map_err(|_| EngineError::Invalid("too many tasks in one workflow".into()))?;

        let workflow = WorkflowRecord::new(scope);
        let tasks: Vec<TaskRecord> = self
            .tasks
            .into_iter()
            .zip(0..task_count)
            .map(|(spec, position)| {
                TaskRecord::new(&workflow, position, spec.slug, spec.execution_profile, spec.input)
            })
            .collect();

        store.insert_workflow(&workflow, &tasks).await?;
        info!(
            "submitted workflow {} ({} tasks) for tenant '{}'",
            workflow.id,
            tasks.len(),
            workflow.tenant_scope
        );
        Ok(WorkflowSnapshot { workflow, tasks })
    }
}

/// Load a workflow and its tasks.
pub async fn load_workflow(
    store: &dyn Store,
    scope: &TenantScope,
    workflow_id: uuid::Uuid,
) -> Result<WorkflowSnapshot, EngineError> {
    let workflow = store
        .get_workflow(scope, workflow_id)
        .await?
        .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
    let tasks = store.list_tasks(scope, workflow_id).await?;
    Ok(WorkflowSnapshot { workflow, tasks })
}
