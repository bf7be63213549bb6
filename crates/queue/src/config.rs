//! Scheduler configuration.
//!
//! Passed into [`QueueRouter::start`](crate::QueueRouter::start); nothing here
//! is read from process-wide state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use engine::{ExecutorConfig, RetryPolicy};

/// A named lane and the size of its worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneConfig {
    pub name: String,
    /// Stages allowed to run on this lane at once.
    pub workers: usize,
}

/// What a workflow chain does after one of its tasks fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainPolicy {
    /// Keep running the remaining tasks; their outcomes are recorded but the
    /// workflow stays `failure`.
    #[default]
    Continue,
    /// Stop before the next task once the workflow is `failure`, leaving the
    /// remaining tasks `pending`.
    Halt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub cpu_lane: LaneConfig,
    pub io_lane: LaneConfig,
    pub dispatch_timeout: Duration,
    pub retry: RetryPolicy,
    pub chain_policy: ChainPolicy,
    /// Engines without a heartbeat this recent are not selected.
    pub heartbeat_ttl: Option<Duration>,
    /// Capacity of the stage event channel.
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_lane: LaneConfig { name: "cpu".into(), workers: 4 },
            io_lane: LaneConfig { name: "io".into(), workers: 16 },
            dispatch_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            chain_policy: ChainPolicy::default(),
            heartbeat_ttl: None,
            event_buffer: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        for lane in [&self.cpu_lane, &self.io_lane] {
            if lane.name.trim().is_empty() {
                return Err("lane names must not be empty".into());
            }
            if lane.workers == 0 {
                return Err(format!("lane '{}' needs at least one worker", lane.name));
            }
        }
        if self.cpu_lane.name == self.io_lane.name {
            return Err(format!("cpu and io lanes share the name '{}'", self.cpu_lane.name));
        }
        if self.dispatch_timeout.is_zero() {
            return Err("dispatch timeout must be positive".into());
        }
        if self.event_buffer == 0 {
            return Err("event buffer must be positive".into());
        }
        self.retry.validate()
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry: self.retry,
            dispatch_timeout: self.dispatch_timeout,
        }
    }
}
