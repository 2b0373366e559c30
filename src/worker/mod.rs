//! Worker system: schedules workload steps.
//!
//! - `queue`: ready / waiting / running / retired bookkeeping
//! - `scheduler`: the loop, the worker pool and the operator entry points

pub mod queue;
pub mod scheduler;

pub use queue::{QueueSnapshot, QueueState, Slot};
pub use scheduler::{Scheduler, SchedulerConfig, TickReport, WorkloadStatus};
