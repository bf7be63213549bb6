//! Lanes: named scheduling queues with their own worker pools.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use db::ExecutionProfile;

use crate::router::{Inner, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Cpu,
    Io,
}

impl Lane {
    /// Lane for a task's execute stage. Finalize always runs on [`Lane::Io`].
    pub fn for_profile(profile: ExecutionProfile) -> Self {
        match profile {
            ExecutionProfile::Cpu => Self::Cpu,
            ExecutionProfile::Io => Self::Io,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Io => f.write_str("io"),
        }
    }
}

/// Pull jobs off `rx` and run each on its own task, at most `workers` at a time.
///
/// Holds the router weakly: once every router handle is dropped the loop
/// exits after the channel drains.
pub(crate) async fn run_lane(
    lane: Lane,
    name: String,
    workers: usize,
    mut rx: mpsc::UnboundedReceiver<Job>,
    router: Weak<Inner>,
) {
    info!("lane '{}' ({}) started with {} workers", name, lane, workers);
    let permits = Arc::new(Semaphore::new(workers));

    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let Some(inner) = router.upgrade() else {
            warn!("lane '{}' dropping job: router is gone", name);
            break;
        };
        debug!("lane '{}' picked up {}", name, job.describe());
        tokio::spawn(async move {
            inner.handle(job).await;
            drop(permit);
        });
    }

    info!("lane '{}' stopped", name);
}
