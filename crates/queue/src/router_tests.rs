//! Router tests: lane placement, per-workflow ordering and aggregation
//! through the full two-stage pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use db::{ExecutionProfile, MemoryStore, Status, Store, TaskRecord, TenantScope};
use dispatch::mock::{MockDispatcher, MockReply};
use dispatch::{Dispatcher, HttpDispatcher};
use engine::{RetryPolicy, TaskSpec, WorkflowSnapshot, WorkflowSpec};

use crate::{ChainPolicy, Lane, Phase, QueueError, QueueRouter, SchedulerConfig, Stage, StageEvent};

fn scope() -> TenantScope {
    TenantScope::new("tenant-1")
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..SchedulerConfig::default()
    }
}

struct Harness {
    store: Arc<dyn Store>,
    router: QueueRouter,
}

impl Harness {
    async fn new(dispatcher: Arc<dyn Dispatcher>, config: SchedulerConfig, engine_url: &str) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let router = QueueRouter::start(config, store.clone(), dispatcher).unwrap();
        router.catalog().register("e1", engine_url, "/run").await.unwrap();
        Self { store, router }
    }

    async fn with_mock(mock: Arc<MockDispatcher>, config: SchedulerConfig) -> Self {
        Self::new(mock, config, "http://e1").await
    }

    async fn submit(&self, tasks: Vec<(&str, ExecutionProfile)>) -> WorkflowSnapshot {
        self.submit_as(scope(), tasks.into_iter().map(|(s, p)| (s, p, json!({}))).collect())
            .await
    }

    async fn submit_as(&self, scope: TenantScope, tasks: Vec<(&str, ExecutionProfile, Value)>) -> WorkflowSnapshot {
        let specs = tasks
            .into_iter()
            .map(|(slug, profile, input)| TaskSpec::new(slug, profile, input))
            .collect();
        WorkflowSpec::new(specs).submit(self.store.as_ref(), scope).await.unwrap()
    }

    async fn task(&self, id: Uuid) -> TaskRecord {
        self.store.get_task(&scope(), id).await.unwrap().unwrap()
    }

    async fn workflow_status(&self, id: Uuid) -> Status {
        self.store.get_workflow(&scope(), id).await.unwrap().unwrap().status
    }
}

fn drain(rx: &mut broadcast::Receiver<StageEvent>) -> Vec<StageEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================
// Ordering and lane placement
// ============================================================

#[tokio::test]
async fn stages_run_in_order_on_their_lanes() {
    let mock = Arc::new(MockDispatcher::new());
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h
        .submit(vec![("a", ExecutionProfile::Cpu), ("b", ExecutionProfile::Io), ("c", ExecutionProfile::Cpu)])
        .await;
    let mut rx = h.router.subscribe();

    let handle = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await.unwrap().unwrap();
    assert_eq!(handle.ticket.lane, Lane::Cpu);
    let report = handle.wait().await.unwrap();
    assert_eq!(report.workflow_status, Some(Status::Success));
    assert!(!report.halted);

    let seen: Vec<(Uuid, Stage, Phase, Lane)> = drain(&mut rx)
        .into_iter()
        .map(|e| (e.task_id, e.stage, e.phase, e.lane))
        .collect();
    let mut expected = Vec::new();
    for task in &snap.tasks {
        let execute_lane = Lane::for_profile(task.execution_profile);
        expected.push((task.id, Stage::Execute, Phase::Started, execute_lane));
        expected.push((task.id, Stage::Execute, Phase::Finished, execute_lane));
        expected.push((task.id, Stage::Finalize, Phase::Started, Lane::Io));
        expected.push((task.id, Stage::Finalize, Phase::Finished, Lane::Io));
    }
    assert_eq!(seen, expected);

    let slugs: Vec<String> = mock.calls().into_iter().map(|c| c.slug).collect();
    assert_eq!(slugs, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn every_task_carries_the_job_id() {
    let h = Harness::with_mock(Arc::new(MockDispatcher::new()), fast_config()).await;
    let snap = h.submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Io)]).await;

    let handle = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await.unwrap().unwrap();
    let job_id = handle.job_id().to_string();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.tasks.len(), 2);
    for task in &report.tasks {
        assert_eq!(task.queue_job_id.as_deref(), Some(job_id.as_str()));
    }
}

// ============================================================
// Aggregation through the pipeline
// ============================================================

#[tokio::test]
async fn all_successful_tasks_complete_the_workflow() {
    let h = Harness::with_mock(Arc::new(MockDispatcher::new()), fast_config()).await;
    let snap = h
        .submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Cpu), ("c", ExecutionProfile::Io)])
        .await;

    let report = h
        .router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.workflow_status, Some(Status::Success));
    assert!(report.tasks.iter().all(|t| t.status == Status::Success));
    assert_eq!(report.tasks[1].output, Some(json!({"slug": "b"})));
}

#[tokio::test]
async fn failure_in_the_middle_is_not_reverted_by_later_success() {
    let mock = Arc::new(MockDispatcher::new().on("b", MockReply::Fail("engine returned HTTP 500".into())));
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h
        .submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Cpu), ("c", ExecutionProfile::Io)])
        .await;
    let mut rx = h.router.subscribe();

    let report = h
        .router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    let statuses: Vec<Status> = report.tasks.iter().map(|t| t.status).collect();
    assert_eq!(statuses, vec![Status::Success, Status::Failure, Status::Success]);
    assert_eq!(report.workflow_status, Some(Status::Failure));
    assert_eq!(mock.call_count("b"), 3);
    assert_eq!(mock.call_count("c"), 1);

    let attempts: Vec<Option<u32>> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.stage == Stage::Execute && e.phase == Phase::Finished)
        .map(|e| e.attempts)
        .collect();
    assert_eq!(attempts, vec![Some(1), Some(3), Some(1)]);
}

#[tokio::test]
async fn halt_policy_leaves_remaining_tasks_pending() {
    let mock = Arc::new(MockDispatcher::new().on("b", MockReply::Fail("engine returned HTTP 500".into())));
    let config = SchedulerConfig { chain_policy: ChainPolicy::Halt, ..fast_config() };
    let h = Harness::with_mock(mock.clone(), config).await;
    let snap = h
        .submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Io), ("c", ExecutionProfile::Io)])
        .await;

    let report = h
        .router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(report.halted);
    assert_eq!(report.workflow_status, Some(Status::Failure));
    assert_eq!(h.task(snap.tasks[2].id).await.status, Status::Pending);
    assert_eq!(mock.call_count("c"), 0);
}

#[tokio::test]
async fn no_active_engine_fails_each_task_without_dispatch() {
    let mock = Arc::new(MockDispatcher::new());
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    for engine in h.router.catalog().list().await.unwrap() {
        h.router.catalog().deactivate(engine.id).await.unwrap();
    }
    let snap = h.submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Cpu)]).await;

    let report = h
        .router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.workflow_status, Some(Status::Failure));
    assert!(report.tasks.iter().all(|t| t.status == Status::Failure));
    assert!(report.tasks[0].error.contains("no active engine"), "{}", report.tasks[0].error);
    assert!(mock.calls().is_empty());
}

// ============================================================
// Enqueue edge cases
// ============================================================

#[tokio::test]
async fn empty_workflow_is_not_enqueued() {
    let h = Harness::with_mock(Arc::new(MockDispatcher::new()), fast_config()).await;
    let snap = h.submit(vec![]).await;

    let handle = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await.unwrap();
    assert!(handle.is_none());
    assert_eq!(h.workflow_status(snap.workflow.id).await, Status::Pending);
}

#[tokio::test]
async fn terminal_workflow_is_not_rerun() {
    let mock = Arc::new(MockDispatcher::new());
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h.submit(vec![("a", ExecutionProfile::Io)]).await;
    h.router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    let again = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await;
    assert!(matches!(
        again,
        Err(QueueError::AlreadyTerminal { status: Status::Success, .. })
    ));
    assert_eq!(mock.call_count("a"), 1);
}

#[tokio::test]
async fn chain_stops_at_a_task_in_flight_elsewhere() {
    let mock = Arc::new(MockDispatcher::new());
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h
        .submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Io), ("c", ExecutionProfile::Io)])
        .await;
    // b was claimed by some other job before this chain reached it.
    assert!(h.store.mark_task_running(&scope(), snap.tasks[1].id).await.unwrap());

    let report = h
        .router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(report.halted);
    let statuses: Vec<Status> = report.tasks.iter().map(|t| t.status).collect();
    assert_eq!(statuses, vec![Status::Success, Status::Running, Status::Pending]);
    assert_eq!(report.tasks[1].queue_job_id, None);
    assert_eq!(mock.call_count("b"), 0);
    assert_eq!(mock.call_count("c"), 0);
}

#[tokio::test]
async fn workflows_are_invisible_to_other_tenants() {
    let h = Harness::with_mock(Arc::new(MockDispatcher::new()), fast_config()).await;
    let snap = h
        .submit_as(TenantScope::new("tenant-2"), vec![("a", ExecutionProfile::Io, json!({}))])
        .await;

    let result = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await;
    assert!(matches!(result, Err(QueueError::WorkflowNotFound(id)) if id == snap.workflow.id));
    assert!(matches!(
        h.router.enqueue_task_run(&scope(), snap.tasks[0].id).await,
        Err(QueueError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn single_task_run_leaves_siblings_alone() {
    let mock = Arc::new(MockDispatcher::new());
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h.submit(vec![("a", ExecutionProfile::Cpu), ("b", ExecutionProfile::Io)]).await;

    let handle = h.router.enqueue_task_run(&scope(), snap.tasks[0].id).await.unwrap();
    assert_eq!(handle.ticket.lane, Lane::Cpu);
    let report = handle.wait().await.unwrap();

    assert_eq!(report.tasks[0].status, Status::Success);
    assert_eq!(report.tasks[1].status, Status::Pending);
    assert_eq!(report.workflow_status, Some(Status::Running));
    assert_eq!(mock.call_count("b"), 0);

    let again = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await;
    assert!(matches!(again, Err(QueueError::AlreadyRunning(_))));
}

#[tokio::test]
async fn rerunning_a_finished_task_dispatches_nothing() {
    let mock = Arc::new(MockDispatcher::new());
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h.submit(vec![("a", ExecutionProfile::Io)]).await;
    let task_id = snap.tasks[0].id;

    h.router.enqueue_task_run(&scope(), task_id).await.unwrap().wait().await.unwrap();
    let report = h.router.enqueue_task_run(&scope(), task_id).await.unwrap().wait().await.unwrap();

    assert_eq!(report.tasks[0].status, Status::Success);
    assert_eq!(mock.call_count("a"), 1);
}

// ============================================================
// Concurrency and cancellation (paused clock)
// ============================================================

#[tokio::test(start_paused = true)]
async fn separate_workflows_share_the_lane_pool() {
    let mock = Arc::new(MockDispatcher::new().delay("slow", Duration::from_secs(10)));
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let w1 = h.submit(vec![("slow", ExecutionProfile::Cpu)]).await;
    let w2 = h.submit(vec![("slow", ExecutionProfile::Cpu)]).await;

    let start = Instant::now();
    let h1 = h.router.enqueue_workflow_run(&scope(), w1.workflow.id).await.unwrap().unwrap();
    let h2 = h.router.enqueue_workflow_run(&scope(), w2.workflow.id).await.unwrap().unwrap();
    h1.wait().await.unwrap();
    h2.wait().await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(15), "ran serially: {:?}", start.elapsed());
    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].started < calls[1].finished && calls[1].started < calls[0].finished);
}

#[tokio::test(start_paused = true)]
async fn second_enqueue_of_a_running_workflow_is_rejected() {
    let mock = Arc::new(
        MockDispatcher::new()
            .delay("a", Duration::from_secs(10))
            .delay("b", Duration::from_secs(10)),
    );
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h.submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Io)]).await;

    let handle = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await.unwrap().unwrap();
    let job_id = handle.job_id().to_string();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let again = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await;
    assert!(matches!(again, Err(QueueError::AlreadyRunning(id)) if id == snap.workflow.id));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.workflow_status, Some(Status::Success));
    for task in &report.tasks {
        assert_eq!(task.queue_job_id.as_deref(), Some(job_id.as_str()));
    }

    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].slug.as_str(), calls[1].slug.as_str()), ("a", "b"));
    assert!(calls[1].started >= calls[0].finished);
}

#[tokio::test(start_paused = true)]
async fn lane_workers_bound_concurrency() {
    let mock = Arc::new(MockDispatcher::new().delay("slow", Duration::from_secs(10)));
    let mut config = fast_config();
    config.cpu_lane.workers = 1;
    let h = Harness::with_mock(mock.clone(), config).await;
    let w1 = h.submit(vec![("slow", ExecutionProfile::Cpu)]).await;
    let w2 = h.submit(vec![("slow", ExecutionProfile::Cpu)]).await;

    let start = Instant::now();
    let h1 = h.router.enqueue_workflow_run(&scope(), w1.workflow.id).await.unwrap().unwrap();
    let h2 = h.router.enqueue_workflow_run(&scope(), w2.workflow.id).await.unwrap().unwrap();
    h1.wait().await.unwrap();
    h2.wait().await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn cancel_keeps_in_flight_outcome_and_workflow_failure() {
    let mock = Arc::new(MockDispatcher::new().delay("a", Duration::from_secs(5)));
    let h = Harness::with_mock(mock.clone(), fast_config()).await;
    let snap = h.submit(vec![("a", ExecutionProfile::Io), ("b", ExecutionProfile::Io)]).await;
    let mut rx = h.router.subscribe();

    let handle = h.router.enqueue_workflow_run(&scope(), snap.workflow.id).await.unwrap().unwrap();
    loop {
        let event = rx.recv().await.unwrap();
        if event.task_id == snap.tasks[0].id && event.stage == Stage::Execute && event.phase == Phase::Started {
            break;
        }
    }
    assert!(h.router.cancel_workflow(&scope(), snap.workflow.id).await.unwrap());

    let report = handle.wait().await.unwrap();
    assert_eq!(report.workflow_status, Some(Status::Failure));
    assert_eq!(report.tasks[0].status, Status::Success);
    assert!(!h.router.cancel_workflow(&scope(), snap.workflow.id).await.unwrap());
}

// ============================================================
// End to end over HTTP
// ============================================================

#[tokio::test]
async fn http_engine_scenario_fails_workflow_after_exhausted_retries() {
    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("POST", "/run")
        .match_body(mockito::Matcher::PartialJson(json!({"task_slug": "a"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result": "a-done"}"#)
        .expect(1)
        .create_async()
        .await;
    let failing = server
        .mock("POST", "/run")
        .match_body(mockito::Matcher::PartialJson(json!({"task_slug": "b"})))
        .with_status(500)
        .with_body("internal error")
        .expect(3)
        .create_async()
        .await;

    let h = Harness::new(Arc::new(HttpDispatcher::new()), fast_config(), &server.url()).await;
    let snap = h
        .submit_as(
            scope(),
            vec![
                ("a", ExecutionProfile::Io, json!({"data": {"n": 1}})),
                ("b", ExecutionProfile::Cpu, json!({})),
            ],
        )
        .await;

    let report = h
        .router
        .enqueue_workflow_run(&scope(), snap.workflow.id)
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    let t1 = &report.tasks[0];
    let t2 = &report.tasks[1];
    assert_eq!(t1.status, Status::Success);
    assert_eq!(t1.output, Some(json!({"result": "a-done"})));
    assert_eq!(t2.status, Status::Failure);
    assert_eq!(t2.retry_count, 2);
    assert!(t2.error.contains("HTTP 500"), "{}", t2.error);
    assert_eq!(report.workflow_status, Some(Status::Failure));
    assert_eq!(h.workflow_status(snap.workflow.id).await, Status::Failure);

    ok.assert_async().await;
    failing.assert_async().await;
}
