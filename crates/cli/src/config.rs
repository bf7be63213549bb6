//! Scheduler knobs as command-line arguments with environment fallbacks.

use std::time::Duration;

use clap::Args;

use engine::RetryPolicy;
use queue::{ChainPolicy, LaneConfig, SchedulerConfig};

#[derive(Debug, Clone, Args)]
pub struct SchedulerArgs {
    /// Name of the lane running CPU-bound execute stages.
    #[arg(long, env = "ORCH_CPU_LANE", default_value = "cpu")]
    pub cpu_lane: String,

    /// Name of the lane running I/O-bound execute stages and every finalize stage.
    #[arg(long, env = "ORCH_IO_LANE", default_value = "io")]
    pub io_lane: String,

    #[arg(long, env = "ORCH_CPU_WORKERS", default_value_t = 4)]
    pub cpu_workers: usize,

    #[arg(long, env = "ORCH_IO_WORKERS", default_value_t = 16)]
    pub io_workers: usize,

    /// Per-attempt HTTP timeout for engine calls.
    #[arg(long, env = "ORCH_DISPATCH_TIMEOUT_SECS", default_value_t = 60)]
    pub dispatch_timeout_secs: u64,

    /// Dispatch attempts per task, the first one included.
    #[arg(long, env = "ORCH_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "ORCH_BACKOFF_BASE_SECS", default_value_t = 5)]
    pub backoff_base_secs: u64,

    #[arg(long, env = "ORCH_BACKOFF_CAP_SECS", default_value_t = 60)]
    pub backoff_cap_secs: u64,

    /// Stop a workflow's chain after its first failed task.
    #[arg(long, env = "ORCH_HALT_ON_FAILURE")]
    pub halt_on_failure: bool,

    /// Skip engines whose last heartbeat is older than this.
    #[arg(long, env = "ORCH_HEARTBEAT_TTL_SECS")]
    pub heartbeat_ttl_secs: Option<u64>,
}

impl SchedulerArgs {
    pub fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            cpu_lane: LaneConfig { name: self.cpu_lane.clone(), workers: self.cpu_workers },
            io_lane: LaneConfig { name: self.io_lane.clone(), workers: self.io_workers },
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_secs(self.backoff_base_secs),
                max_delay: Duration::from_secs(self.backoff_cap_secs),
            },
            chain_policy: if self.halt_on_failure { ChainPolicy::Halt } else { ChainPolicy::Continue },
            heartbeat_ttl: self.heartbeat_ttl_secs.map(Duration::from_secs),
            ..SchedulerConfig::default()
        }
    }
}
