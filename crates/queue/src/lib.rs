//! `queue` crate: lane routing and per-workflow chaining.
//!
//! [`QueueRouter`] places each task's execute stage on the CPU or I/O lane
//! according to its execution profile, always runs the finalize stage on the
//! I/O lane, and chains the tasks of a workflow so that task *n + 1* starts
//! only after task *n* has been finalized. Different workflows share the lane
//! worker pools and run concurrently.

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod lane;
pub mod router;

pub use config::{ChainPolicy, LaneConfig, SchedulerConfig};
pub use error::QueueError;
pub use events::{Phase, Stage, StageEvent};
pub use job::{JobHandle, JobReport, JobTicket};
pub use lane::Lane;
pub use router::QueueRouter;

#[cfg(test)]
mod router_tests;
