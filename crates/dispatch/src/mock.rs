//! `MockDispatcher`: a scripted test double for [`Dispatcher`].
//!
//! Replies are configured per task slug; every call is recorded with the
//! tokio clock so tests running on paused time can assert backoff delays.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use db::{EngineRecord, TaskRecord};

use crate::{DispatchResult, Dispatcher};

/// What the mock answers for a given slug.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this output.
    Succeed(Value),
    /// Fail with this error text.
    Fail(String),
}

/// One recorded `run_task` call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub task_id: Uuid,
    pub slug: String,
    pub engine_id: Uuid,
    pub started: Instant,
    pub finished: Instant,
}

/// A dispatcher that records every call and answers from a script.
///
/// Slugs without a script succeed with `{"slug": <slug>}`. A scripted slug
/// pops replies in order and keeps repeating the last one.
#[derive(Default)]
pub struct MockDispatcher {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    delays: HashMap<String, Duration>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call for `slug` with `reply`.
    pub fn on(self, slug: impl Into<String>, reply: MockReply) -> Self {
        self.script(slug, vec![reply])
    }

    /// Answer calls for `slug` with `replies` in order; the last one repeats.
    pub fn script(self, slug: impl Into<String>, replies: Vec<MockReply>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(slug.into(), replies.into());
        self
    }

    /// Hold every call for `slug` for `delay` before answering.
    pub fn delay(mut self, slug: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(slug.into(), delay);
        self
    }

    /// All calls seen so far, in call order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Number of calls made for `slug`.
    pub fn call_count(&self, slug: &str) -> usize {
        self.calls().iter().filter(|c| c.slug == slug).count()
    }

    fn next_reply(&self, slug: &str) -> MockReply {
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        match scripts.get_mut(slug) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| default_reply(slug)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| default_reply(slug)),
            None => default_reply(slug),
        }
    }
}

fn default_reply(slug: &str) -> MockReply {
    MockReply::Succeed(json!({ "slug": slug }))
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn run_task(&self, task: &TaskRecord, engine: &EngineRecord, _timeout: Duration) -> DispatchResult {
        let started = Instant::now();
        let dispatched_at = Utc::now();

        if let Some(delay) = self.delays.get(&task.slug) {
            tokio::time::sleep(*delay).await;
        }
        let reply = self.next_reply(&task.slug);

        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(MockCall {
            task_id: task.id,
            slug: task.slug.clone(),
            engine_id: engine.id,
            started,
            finished: Instant::now(),
        });

        match reply {
            MockReply::Succeed(output) => DispatchResult::success(engine.id, dispatched_at, output),
            MockReply::Fail(error) => DispatchResult::failure(engine.id, dispatched_at, error),
        }
    }
}
