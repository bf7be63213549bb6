//! reqwest-backed [`Dispatcher`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use db::{EngineRecord, TaskRecord};

use crate::{DispatchPayload, DispatchResult, Dispatcher};

/// Longest slice of an error response body kept in the task's error text.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a preconfigured client (proxies, TLS roots, pool limits).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    #[instrument(skip(self, task, engine), fields(task_id = %task.id, slug = %task.slug, engine = %engine.name))]
    async fn run_task(&self, task: &TaskRecord, engine: &EngineRecord, timeout: Duration) -> DispatchResult {
        let dispatched_at = Utc::now();
        let payload = match DispatchPayload::from_task(task) {
            Ok(p) => p,
            Err(e) => return DispatchResult::failure(engine.id, dispatched_at, e.to_string()),
        };

        let url = engine.run_url();
        debug!("POST {}", url);

        let response = match self.client.post(&url).timeout(timeout).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                let cause = if e.is_timeout() {
                    format!("request to {url} timed out after {timeout:?}")
                } else {
                    format!("request to {url} failed: {e}")
                };
                warn!("{}", cause);
                return DispatchResult::failure(engine.id, dispatched_at, cause);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let cause = format!("engine '{}' returned HTTP {}: {}", engine.name, status.as_u16(), truncate(&body));
            warn!("{}", cause);
            return DispatchResult::failure(engine.id, dispatched_at, cause);
        }

        match response.json::<Value>().await {
            Ok(output) => DispatchResult::success(engine.id, dispatched_at, output),
            Err(e) => {
                let cause = format!("malformed response from engine '{}': {e}", engine.name);
                warn!("{}", cause);
                DispatchResult::failure(engine.id, dispatched_at, cause)
            }
        }
    }
}
