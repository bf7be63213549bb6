//! In-memory [`Store`] implementation.
//!
//! Every operation takes the single state lock once, so each conditional
//! write is a compare-and-swap. Used by tests and by single-process
//! deployments that do not need durability.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{EngineRecord, Status, TaskCompletion, TaskRecord, TenantScope, WorkflowRecord};
use crate::{DbError, Store};

type ScopedKey = (TenantScope, Uuid);

#[derive(Default)]
struct State {
    engines: Vec<EngineRecord>,
    workflows: HashMap<ScopedKey, WorkflowRecord>,
    tasks: HashMap<ScopedKey, TaskRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge every other caller.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn key(scope: &TenantScope, id: Uuid) -> ScopedKey {
    (scope.clone(), id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_engine(&self, engine: &EngineRecord) -> Result<(), DbError> {
        let mut state = self.state();
        if state.engines.iter().any(|e| e.name == engine.name || e.id == engine.id) {
            return Err(DbError::InvalidTransition(format!(
                "engine '{}' is already registered",
                engine.name
            )));
        }
        state.engines.push(engine.clone());
        Ok(())
    }

    async fn list_engines(&self) -> Result<Vec<EngineRecord>, DbError> {
        Ok(self.state().engines.clone())
    }

    async fn set_engine_active(&self, engine_id: Uuid, active: bool) -> Result<(), DbError> {
        let mut state = self.state();
        let engine = state
            .engines
            .iter_mut()
            .find(|e| e.id == engine_id)
            .ok_or(DbError::NotFound)?;
        engine.is_active = active;
        Ok(())
    }

    async fn touch_engine_heartbeat(&self, engine_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let mut state = self.state();
        let engine = state
            .engines
            .iter_mut()
            .find(|e| e.id == engine_id)
            .ok_or(DbError::NotFound)?;
        engine.last_heartbeat = Some(at);
        Ok(())
    }

    async fn insert_workflow(&self, workflow: &WorkflowRecord, tasks: &[TaskRecord]) -> Result<(), DbError> {
        let mut state = self.state();
        let scope = &workflow.tenant_scope;
        if state.workflows.contains_key(&key(scope, workflow.id)) {
            return Err(DbError::InvalidTransition(format!("workflow {} already exists", workflow.id)));
        }
        if let Some(stray) = tasks.iter().find(|t| t.workflow_id != workflow.id || &t.tenant_scope != scope) {
            return Err(DbError::InvalidTransition(format!(
                "task {} does not belong to workflow {}",
                stray.id, workflow.id
            )));
        }
        state.workflows.insert(key(scope, workflow.id), workflow.clone());
        for task in tasks {
            state.tasks.insert(key(scope, task.id), task.clone());
        }
        Ok(())
    }

    async fn get_workflow(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<Option<WorkflowRecord>, DbError> {
        Ok(self.state().workflows.get(&key(scope, workflow_id)).cloned())
    }

    async fn get_task(&self, scope: &TenantScope, task_id: Uuid) -> Result<Option<TaskRecord>, DbError> {
        Ok(self.state().tasks.get(&key(scope, task_id)).cloned())
    }

    async fn list_tasks(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<Vec<TaskRecord>, DbError> {
        let state = self.state();
        let mut tasks: Vec<TaskRecord> = state
            .tasks
            .iter()
            .filter(|((s, _), t)| s == scope && t.workflow_id == workflow_id)
            .map(|(_, t)| t.clone())
            .collect();
        tasks.sort_by_key(|t| (t.position, t.created_at));
        Ok(tasks)
    }

    async fn set_queue_job_id(&self, scope: &TenantScope, task_id: Uuid, job_id: &str) -> Result<(), DbError> {
        let mut state = self.state();
        let task = state.tasks.get_mut(&key(scope, task_id)).ok_or(DbError::NotFound)?;
        task.queue_job_id = Some(job_id.to_owned());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_task_running(&self, scope: &TenantScope, task_id: Uuid) -> Result<bool, DbError> {
        let mut state = self.state();
        let task = state.tasks.get_mut(&key(scope, task_id)).ok_or(DbError::NotFound)?;
        if task.status != Status::Pending {
            return Ok(false);
        }
        task.status = Status::Running;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_attempt(
        &self,
        scope: &TenantScope,
        task_id: Uuid,
        engine_id: Uuid,
        retry_count: u32,
    ) -> Result<(), DbError> {
        let mut state = self.state();
        let task = state.tasks.get_mut(&key(scope, task_id)).ok_or(DbError::NotFound)?;
        if task.status != Status::Running {
            return Err(DbError::InvalidTransition(format!(
                "cannot record an attempt on {} task {task_id}",
                task.status
            )));
        }
        task.assigned_engine_id = Some(engine_id);
        task.retry_count = retry_count;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn finalize_task(
        &self,
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
        let mut state = self.state();
        let task = state.tasks.get_mut(&key(scope, task_id)).ok_or(DbError::NotFound)?;
        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = completion.status;
        task.output = completion.output.clone();
        task.error = completion.error.clone();
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_workflow(
        &self,
        scope: &TenantScope,
        workflow_id: Uuid,
        from: &[Status],
        to: Status,
    ) -> Result<bool, DbError> {
        let mut state = self.state();
        let workflow = state
            .workflows
            .get_mut(&key(scope, workflow_id))
            .ok_or(DbError::NotFound)?;
        if !from.contains(&workflow.status) {
            return Ok(false);
        }
        workflow.status = to;
        workflow.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_workflow_if_settled(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<bool, DbError> {
        let mut state = self.state();
        let mut any = false;
        let mut settled = true;
        for ((s, _), task) in &state.tasks {
            if s == scope && task.workflow_id == workflow_id {
                any = true;
                settled &= task.status == Status::Success;
            }
        }
        let workflow = state
            .workflows
            .get_mut(&key(scope, workflow_id))
            .ok_or(DbError::NotFound)?;
        if !any || !settled || workflow.status.is_terminal() {
            return Ok(false);
        }
        workflow.status = Status::Success;
        workflow.updated_at = Utc::now();
        Ok(true)
    }
}
