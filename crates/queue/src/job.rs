//! Job handles returned by the enqueue API.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use db::{Status, TaskRecord, TenantScope};

use crate::{Lane, QueueError};

/// Serializable identity of an enqueued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    /// Lane the first execute stage was placed on.
    pub lane: Lane,
}

/// Final state of a job's workflow once its chain has run out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    /// `None` if the workflow could not be read back.
    pub workflow_status: Option<Status>,
    pub tasks: Vec<TaskRecord>,
    /// The chain stopped early: under [`ChainPolicy::Halt`](crate::ChainPolicy::Halt), or at a task
    /// already running under another job.
    pub halted: bool,
}

/// Returned by the enqueue API; await [`JobHandle::wait`] for the outcome.
#[derive(Debug)]
pub struct JobHandle {
    pub ticket: JobTicket,
    done: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    pub(crate) fn new(ticket: JobTicket, done: oneshot::Receiver<JobReport>) -> Self {
        Self { ticket, done }
    }

    pub fn job_id(&self) -> Uuid {
        self.ticket.job_id
    }

    /// Resolve once the last stage of the job has run.
    pub async fn wait(self) -> Result<JobReport, QueueError> {
        let job_id = self.ticket.job_id;
        self.done.await.map_err(|_| QueueError::Abandoned(job_id))
    }
}

/// The remainder of a job travelling from stage to stage.
#[derive(Debug)]
pub(crate) struct Chain {
    pub job_id: Uuid,
    pub scope: TenantScope,
    pub workflow_id: Uuid,
    /// Tasks still to execute, in order, with their execute lanes.
    pub remaining: VecDeque<(Uuid, Lane)>,
    pub done: Option<oneshot::Sender<JobReport>>,
}
