use thiserror::Error;

use crate::ids::{JobId, WorkflowId};

/// Caller errors: bad input or a resource the caller doesn't own.
///
/// The HTTP layer maps these to 400/404 responses; nothing here is ever
/// retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} is not owned by the caller")]
    JobNotOwned(JobId),

    #[error("unknown job type {0:?}")]
    UnknownJobType(String),
}

/// Errors surfaced by the Workflow Service, a superset of [`ValidationError`]
/// that also carries store-layer failures.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
