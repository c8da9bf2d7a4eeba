#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The Workflow Service: create workflows, append jobs to a branch's tail,
//! and summarize a workflow's status. Sits between the HTTP Surface and the
//! [`scheduler_store::Repository`], validating ownership and job-type
//! enumeration on every call.

mod service;
mod status;

pub use service::{CancelOutcome, WorkflowService};
pub use status::{AggregateStatus, WorkflowStatusReport};
