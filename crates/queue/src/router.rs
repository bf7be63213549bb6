//! The queue router.
//!
//! Every task runs as two jobs: **execute** on the lane chosen by its
//! execution profile, then **finalize** on the I/O lane. A workflow is one
//! chain of such pairs: the finalize job of task *n* enqueues the execute job
//! of task *n + 1*, so at most one task per workflow is ever in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use db::{Status, Store, TaskCompletion, TenantScope};
use dispatch::Dispatcher;
use engine::{load_workflow, EngineCatalog, ExecuteOutcome, TaskExecutor};

use crate::job::Chain;
use crate::lane::run_lane;
use crate::{ChainPolicy, JobHandle, JobReport, JobTicket, Lane, Phase, QueueError, SchedulerConfig, Stage, StageEvent};

pub(crate) enum Job {
    Execute { chain: Chain, task_id: Uuid, lane: Lane },
    Finalize { chain: Chain, task_id: Uuid, completion: TaskCompletion },
}

impl Job {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Execute { chain, task_id, .. } => format!("execute {task_id} (job {})", chain.job_id),
            Self::Finalize { chain, task_id, .. } => format!("finalize {task_id} (job {})", chain.job_id),
        }
    }
}

/// What a chain does once a task's execute stage returns.
enum Next {
    Finalize(TaskCompletion),
    Advance,
    /// The task is in flight under another job; running past it would break
    /// the one-task-at-a-time order.
    Stop,
}

pub(crate) struct Inner {
    executor: TaskExecutor,
    config: SchedulerConfig,
    cpu: mpsc::UnboundedSender<Job>,
    io: mpsc::UnboundedSender<Job>,
    events: broadcast::Sender<StageEvent>,
}

/// Cheap to clone; all clones share the same lanes.
#[derive(Clone)]
pub struct QueueRouter {
    inner: Arc<Inner>,
}

impl QueueRouter {
    /// Validate `config`, build the executor and spawn both lane loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidConfig)?;

        let catalog = EngineCatalog::new(store.clone()).with_heartbeat_ttl(config.heartbeat_ttl);
        let executor = TaskExecutor::new(store, catalog, dispatcher, config.executor_config());

        let (cpu_tx, cpu_rx) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_buffer);

        let inner = Arc::new(Inner {
            executor,
            config: config.clone(),
            cpu: cpu_tx,
            io: io_tx,
            events,
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);

        tokio::spawn(run_lane(Lane::Cpu, config.cpu_lane.name.clone(), config.cpu_lane.workers, cpu_rx, weak.clone()));
        tokio::spawn(run_lane(Lane::Io, config.io_lane.name.clone(), config.io_lane.workers, io_rx, weak));

        Ok(Self { inner })
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.inner.executor
    }

    pub fn catalog(&self) -> &EngineCatalog {
        self.inner.executor.catalog()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.inner.executor.store()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Receive every stage event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.inner.events.subscribe()
    }

    /// Enqueue a single task outside of any workflow chain.
    #[instrument(skip(self), fields(tenant = %scope))]
    pub async fn enqueue_task_run(&self, scope: &TenantScope, task_id: Uuid) -> Result<JobHandle, QueueError> {
        let store = self.store();
        let task = store
            .get_task(scope, task_id)
            .await?
            .ok_or(QueueError::TaskNotFound(task_id))?;

        let job_id = Uuid::new_v4();
        // A task keeps the id of the job that first enqueued it.
        if task.status == Status::Pending {
            store.set_queue_job_id(scope, task_id, &job_id.to_string()).await?;
        }

        let lane = Lane::for_profile(task.execution_profile);
        let (done_tx, done_rx) = oneshot::channel();
        let chain = Chain {
            job_id,
            scope: scope.clone(),
            workflow_id: task.workflow_id,
            remaining: VecDeque::new(),
            done: Some(done_tx),
        };
        self.inner.send(lane, Job::Execute { chain, task_id, lane })?;
        info!("task {} enqueued on {} lane as job {}", task_id, lane, job_id);

        Ok(JobHandle::new(JobTicket { job_id, workflow_id: task.workflow_id, lane }, done_rx))
    }

    /// Enqueue every task of a workflow as one ordered chain.
    ///
    /// Returns `None` for a workflow without tasks; it stays `pending`.
    #[instrument(skip(self), fields(tenant = %scope))]
    pub async fn enqueue_workflow_run(
        &self,
        scope: &TenantScope,
        workflow_id: Uuid,
    ) -> Result<Option<JobHandle>, QueueError> {
        let store = self.store();
        let snapshot = load_workflow(store.as_ref(), scope, workflow_id)
            .await
            .map_err(|e| match e {
                engine::EngineError::WorkflowNotFound(id) => QueueError::WorkflowNotFound(id),
                other => other.into(),
            })?;

        if snapshot.workflow.status.is_terminal() {
            return Err(QueueError::AlreadyTerminal { workflow_id, status: snapshot.workflow.status });
        }
        if snapshot.tasks.is_empty() {
            warn!("workflow {} has no tasks; leaving it {}", workflow_id, snapshot.workflow.status);
            return Ok(None);
        }

        // The pending -> running write is the only gate: a second enqueue, or
        // one racing a single-task run, must not start a parallel chain.
        if !self.inner.executor.aggregator().mark_running(scope, workflow_id).await? {
            return Err(match store.get_workflow(scope, workflow_id).await? {
                Some(wf) if wf.status.is_terminal() => QueueError::AlreadyTerminal { workflow_id, status: wf.status },
                Some(_) => QueueError::AlreadyRunning(workflow_id),
                None => QueueError::WorkflowNotFound(workflow_id),
            });
        }

        let job_id = Uuid::new_v4();
        let job_ref = job_id.to_string();
        for task in snapshot.tasks.iter().filter(|t| t.status == Status::Pending) {
            store.set_queue_job_id(scope, task.id, &job_ref).await?;
        }

        let mut remaining: VecDeque<(Uuid, Lane)> = snapshot
            .tasks
            .iter()
            .map(|t| (t.id, Lane::for_profile(t.execution_profile)))
            .collect();
        let Some((first, lane)) = remaining.pop_front() else {
            return Ok(None);
        };

        let (done_tx, done_rx) = oneshot::channel();
        let chain = Chain {
            job_id,
            scope: scope.clone(),
            workflow_id,
            remaining,
            done: Some(done_tx),
        };
        self.inner.send(lane, Job::Execute { chain, task_id: first, lane })?;
        info!(
            "workflow {} enqueued as job {} ({} tasks, first on {} lane)",
            workflow_id,
            job_id,
            snapshot.tasks.len(),
            lane
        );

        Ok(Some(JobHandle::new(JobTicket { job_id, workflow_id, lane }, done_rx)))
    }

    /// Mark a workflow `failure` without interrupting the in-flight task.
    pub async fn cancel_workflow(&self, scope: &TenantScope, workflow_id: Uuid) -> Result<bool, QueueError> {
        Ok(self.inner.executor.aggregator().cancel(scope, workflow_id).await?)
    }
}

impl Inner {
    fn lane_name(&self, lane: Lane) -> &str {
        match lane {
            Lane::Cpu => &self.config.cpu_lane.name,
            Lane::Io => &self.config.io_lane.name,
        }
    }

    fn send(&self, lane: Lane, job: Job) -> Result<(), QueueError> {
        let tx = match lane {
            Lane::Cpu => &self.cpu,
            Lane::Io => &self.io,
        };
        tx.send(job).map_err(|_| QueueError::LaneClosed(lane))
    }

    fn emit(&self, chain: &Chain, task_id: Uuid, stage: Stage, phase: Phase, lane: Lane, attempts: Option<u32>) {
        // No subscribers is fine.
        let _ = self.events.send(StageEvent {
            job_id: chain.job_id,
            workflow_id: chain.workflow_id,
            task_id,
            stage,
            phase,
            lane,
            attempts,
            at: Instant::now(),
        });
    }

    pub(crate) async fn handle(&self, job: Job) {
        match job {
            Job::Execute { chain, task_id, lane } => {
                let span = info_span!("execute", lane = self.lane_name(lane), job_id = %chain.job_id, %task_id);
                self.execute(chain, task_id, lane).instrument(span).await;
            }
            Job::Finalize { chain, task_id, completion } => {
                let span = info_span!("finalize", lane = self.lane_name(Lane::Io), job_id = %chain.job_id, %task_id);
                self.finalize(chain, task_id, completion).instrument(span).await;
            }
        }
    }

    async fn execute(&self, chain: Chain, task_id: Uuid, lane: Lane) {
        self.emit(&chain, task_id, Stage::Execute, Phase::Started, lane, None);
        let (next, attempts) = match self.executor.execute(&chain.scope, task_id).await {
            Ok(ExecuteOutcome::Completed { completion, attempts, .. }) => {
                info!("task {} executed with {} attempt(s), {}", task_id, attempts, completion.status);
                (Next::Finalize(completion), Some(attempts))
            }
            Ok(ExecuteOutcome::Skipped { status, .. }) if status.is_terminal() => {
                info!("task {} already {}; nothing to finalize", task_id, status);
                (Next::Advance, None)
            }
            Ok(ExecuteOutcome::Skipped { status, .. }) => {
                warn!("task {} is {} under another job; stopping chain {}", task_id, status, chain.job_id);
                (Next::Stop, None)
            }
            Err(e) => {
                error!("execute stage for task {} failed: {}", task_id, e);
                (Next::Finalize(TaskCompletion::failure(e.to_string())), None)
            }
        };
        self.emit(&chain, task_id, Stage::Execute, Phase::Finished, lane, attempts);

        match next {
            Next::Finalize(completion) => {
                let job_id = chain.job_id;
                if let Err(e) = self.send(Lane::Io, Job::Finalize { chain, task_id, completion }) {
                    error!("job {} abandoned: {}", job_id, e);
                }
            }
            Next::Advance => self.advance(chain).await,
            Next::Stop => self.complete(chain, true).await,
        }
    }

    async fn finalize(&self, chain: Chain, task_id: Uuid, completion: TaskCompletion) {
        self.emit(&chain, task_id, Stage::Finalize, Phase::Started, Lane::Io, None);
        let report = self.executor.finalize(&chain.scope, task_id, completion).await;
        if let Some(status) = report.workflow_transition {
            info!("workflow {} is now {}", chain.workflow_id, status);
        }
        self.emit(&chain, task_id, Stage::Finalize, Phase::Finished, Lane::Io, None);
        self.advance(chain).await;
    }

    /// Start the next task of the chain, or resolve the job handle.
    async fn advance(&self, mut chain: Chain) {
        if self.config.chain_policy == ChainPolicy::Halt && !chain.remaining.is_empty() {
            match self.executor.store().get_workflow(&chain.scope, chain.workflow_id).await {
                Ok(Some(wf)) if wf.status == Status::Failure => {
                    warn!(
                        "workflow {} failed; halting chain with {} task(s) left pending",
                        chain.workflow_id,
                        chain.remaining.len()
                    );
                    return self.complete(chain, true).await;
                }
                Ok(_) => {}
                Err(e) => warn!("could not read workflow {} before advancing: {}", chain.workflow_id, e),
            }
        }

        match chain.remaining.pop_front() {
            Some((task_id, lane)) => {
                let job_id = chain.job_id;
                if let Err(e) = self.send(lane, Job::Execute { chain, task_id, lane }) {
                    error!("job {} abandoned: {}", job_id, e);
                }
            }
            None => self.complete(chain, false).await,
        }
    }

    async fn complete(&self, mut chain: Chain, halted: bool) {
        let (workflow_status, tasks) = match load_workflow(
            self.executor.store().as_ref(),
            &chain.scope,
            chain.workflow_id,
        )
        .await
        {
            Ok(snapshot) => (Some(snapshot.workflow.status), snapshot.tasks),
            Err(e) => {
                error!("could not load workflow {} for job report: {}", chain.workflow_id, e);
                (None, Vec::new())
            }
        };

        info!("job {} complete (workflow {:?})", chain.job_id, workflow_status);
        if let Some(done) = chain.done.take() {
            // The caller may have dropped its handle.
            let _ = done.send(JobReport {
                job_id: chain.job_id,
                workflow_id: chain.workflow_id,
                workflow_status,
                tasks,
                halted,
            });
        }
    }
}
