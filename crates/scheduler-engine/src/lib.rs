#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The Scheduler control loop and the Job Runtime it dispatches onto.

mod api;
mod job_runtime;
mod scheduler;

pub use api::{start_scheduler, SchedulerConfig, SchedulerEvent, SchedulerHandle};
pub use job_runtime::JobRuntimeError;
