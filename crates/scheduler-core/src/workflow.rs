use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BranchId, UserId, WorkflowId};

/// A named collection of branches owned by one user. Never mutated after
/// creation; deleted only by the process-startup purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An ordered sequence of jobs that must execute serially. Created lazily
/// when the first job of a named branch is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub workflow_id: WorkflowId,
    pub name: String,
}
