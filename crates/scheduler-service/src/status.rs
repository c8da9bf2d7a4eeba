use serde::Serialize;

use scheduler_core::{Job, JobStatus};

/// Aggregate status of a workflow, derived from its jobs by the precedence
/// rule: `RUNNING` > `PENDING` > `FAILED` > `CANCELLED` > `SUCCEEDED`, with
/// `EMPTY` for a workflow that has no jobs yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateStatus {
    Empty,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A workflow's roll-up: its jobs (ordered by branch then `order_index`, as
/// returned by [`scheduler_store::Repository::list_jobs_for_workflow`]), the
/// precedence-derived aggregate status, and the unweighted mean progress
/// across jobs.
///
/// Mean progress is an approximation: a workflow with one long job and one
/// short job will read as further along than it is once the short job
/// finishes. Acceptable for a status display; see the design notes.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatusReport {
    pub status: AggregateStatus,
    pub mean_progress: f64,
    pub jobs: Vec<Job>,
}

pub fn summarize(jobs: Vec<Job>) -> WorkflowStatusReport {
    if jobs.is_empty() {
        return WorkflowStatusReport {
            status: AggregateStatus::Empty,
            mean_progress: 0.0,
            jobs,
        };
    }

    let status = if jobs.iter().any(|j| j.status == JobStatus::Running) {
        AggregateStatus::Running
    } else if jobs.iter().any(|j| j.status == JobStatus::Pending) {
        AggregateStatus::Pending
    } else if jobs.iter().any(|j| j.status == JobStatus::Failed) {
        AggregateStatus::Failed
    } else if jobs.iter().any(|j| j.status == JobStatus::Cancelled) {
        AggregateStatus::Cancelled
    } else {
        AggregateStatus::Succeeded
    };

    let mean_progress = jobs.iter().map(|j| j.progress).sum::<f64>() / jobs.len() as f64;

    WorkflowStatusReport {
        status,
        mean_progress,
        jobs,
    }
}
