//! Persisted entity shapes.
//!
//! `*Record` types are what the rest of the workspace works with. `*Row`
//! types map 1-to-1 onto database tables and are converted into records at
//! the repository boundary, so status columns stay plain `TEXT`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Tenant scope
// ---------------------------------------------------------------------------

/// Opaque multi-tenant context token.
///
/// The orchestrator never interprets it; it is threaded through every read
/// and write and stored in the `tenant_scope` column of every tenant table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantScope(String);

impl TenantScope {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status shared by tasks and workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Success,
    Failure,
}

impl Status {
    /// `success` and `failure` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(DbError::CorruptRow(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution profile
// ---------------------------------------------------------------------------

/// Routing hint that decides which lane runs a task's execute stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProfile {
    Cpu,
    #[default]
    Io,
}

impl ExecutionProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ExecutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionProfile {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "io" => Ok(Self::Io),
            other => Err(DbError::CorruptRow(format!("unknown execution profile: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// engines
// ---------------------------------------------------------------------------

/// A registered compute engine. Not tenant-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EngineRecord {
    pub id: Uuid,
    /// Unique across the catalog.
    pub name: String,
    pub base_url: String,
    pub run_path: String,
    pub is_active: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Registration time; the catalog's tie-break order.
    pub registered_at: DateTime<Utc>,
}

impl EngineRecord {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, run_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_url: base_url.into(),
            run_path: run_path.into(),
            is_active: true,
            last_heartbeat: None,
            registered_at: Utc::now(),
        }
    }

    /// Full URL the dispatch call is POSTed to.
    pub fn run_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.run_path.trim_start_matches('/')
        )
    }
}

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A workflow: an ordered collection of tasks with a derived status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub status: Status,
    pub tenant_scope: TenantScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(tenant_scope: TenantScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: Status::Pending,
            tenant_scope,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub status: String,
    pub tenant_scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for WorkflowRecord {
    type Error = DbError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            status: row.status.parse()?,
            tenant_scope: TenantScope::new(row.tenant_scope),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// tasks
// ---------------------------------------------------------------------------

/// The atomic unit of dispatched work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Zero-based execution order within the workflow.
    pub position: i32,
    pub slug: String,
    pub status: Status,
    pub tenant_scope: TenantScope,
    pub execution_profile: ExecutionProfile,
    /// Immutable after creation.
    pub input: Value,
    pub output: Option<Value>,
    /// Empty unless the task failed.
    pub error: String,
    pub assigned_engine_id: Option<Uuid>,
    pub queue_job_id: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        workflow: &WorkflowRecord,
        position: i32,
        slug: impl Into<String>,
        execution_profile: ExecutionProfile,
        input: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            position,
            slug: slug.into(),
            status: Status::Pending,
            tenant_scope: workflow.tenant_scope.clone(),
            execution_profile,
            input,
            output: None,
            error: String::new(),
            assigned_engine_id: None,
            queue_job_id: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub position: i32,
    pub slug: String,
    pub status: String,
    pub tenant_scope: String,
    pub execution_profile: String,
    pub input: Value,
    pub output: Option<Value>,
    pub error: String,
    pub assigned_engine_id: Option<Uuid>,
    pub queue_job_id: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = DbError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            position: row.position,
            slug: row.slug,
            status: row.status.parse()?,
            tenant_scope: TenantScope::new(row.tenant_scope),
            execution_profile: row.execution_profile.parse()?,
            input: row.input,
            output: row.output,
            error: row.error,
            assigned_engine_id: row.assigned_engine_id,
            queue_job_id: row.queue_job_id,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|_| DbError::CorruptRow(format!("negative retry_count on task {}", row.id)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Terminal outcome written onto a task by the finalize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub status: Status,
    pub output: Option<Value>,
    pub error: String,
}

impl TaskCompletion {
    pub fn success(output: Value) -> Self {
        Self { status: Status::Success, output: Some(output), error: String::new() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { status: Status::Failure, output: None, error: error.into() }
    }
}
