use std::sync::Arc;

use chrono::Utc;
use scheduler_core::{Job, JobId, JobType, UserId, ValidationError, Workflow, WorkflowError, WorkflowId};
use scheduler_engine::SchedulerHandle;
use scheduler_store::{Repository, StoreError};
use tracing::instrument;

use crate::status::{summarize, WorkflowStatusReport};

/// Lifts a [`StoreError`] into the [`anyhow::Error`] carried by
/// [`WorkflowError::Store`]; the store and service crates stay decoupled
/// from each other's error types.
fn store_err(err: StoreError) -> anyhow::Error {
    err.into()
}

/// What happened when a job cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was already in a terminal state; nothing changed.
    AlreadyTerminal,
    /// The job was flipped to `CANCELLED`. `was_running` reports whether an
    /// in-memory task handle was found and torn down as part of the call.
    Cancelled { was_running: bool },
}

/// Create/append/status-report operations over workflows, branches and
/// jobs. Every call validates that the acting `user_id` owns the resource
/// it touches before delegating to the [`Repository`].
pub struct WorkflowService {
    repo: Arc<dyn Repository>,
}

impl WorkflowService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self))]
    pub async fn create_workflow(&self, user_id: UserId, name: String) -> Result<Workflow, WorkflowError> {
        Ok(self.repo.create_workflow(user_id, name).await.map_err(store_err)?)
    }

    #[instrument(skip(self))]
    pub async fn list_workflows(&self, user_id: &UserId) -> Result<Vec<Workflow>, WorkflowError> {
        Ok(self.repo.list_workflows(user_id).await.map_err(store_err)?)
    }

    async fn owned_workflow(&self, user_id: &UserId, workflow_id: WorkflowId) -> Result<Workflow, WorkflowError> {
        let workflow = self
            .repo
            .get_workflow(workflow_id)
            .await
            .map_err(store_err)?
            .ok_or(ValidationError::WorkflowNotFound(workflow_id))?;
        if &workflow.user_id != user_id {
            return Err(ValidationError::WorkflowNotFound(workflow_id).into());
        }
        Ok(workflow)
    }

    /// Appends a job to the named branch of `workflow_id`, auto-creating the
    /// branch if this is its first job. Rejects unknown `job_type`s and
    /// workflows the caller doesn't own.
    #[instrument(skip(self))]
    #[allow(clippy::too_many_arguments)]
    pub async fn add_job(
        &self,
        user_id: UserId,
        workflow_id: WorkflowId,
        branch_name: String,
        job_type: JobType,
        input_path: String,
        output_path: String,
    ) -> Result<Job, WorkflowError> {
        let workflow = self.owned_workflow(&user_id, workflow_id).await?;
        if !job_type.is_known() {
            return Err(ValidationError::UnknownJobType(job_type.as_str().to_string()).into());
        }

        let branch = self
            .repo
            .get_or_create_branch(workflow.id, &branch_name)
            .await
            .map_err(store_err)?;
        let job = self
            .repo
            .append_job(workflow.id, &branch, user_id, job_type, input_path, output_path)
            .await
            .map_err(store_err)?;
        Ok(job)
    }

    /// The workflow's roll-up: jobs ordered by branch then `order_index`,
    /// an aggregate status by precedence, and mean progress.
    #[instrument(skip(self))]
    pub async fn workflow_status(
        &self,
        user_id: &UserId,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowStatusReport, WorkflowError> {
        self.owned_workflow(user_id, workflow_id).await?;
        let jobs = self
            .repo
            .list_jobs_for_workflow(workflow_id)
            .await
            .map_err(store_err)?;
        Ok(summarize(jobs))
    }

    /// Cancels `job_id` on behalf of `user_id`: flips the persisted row to
    /// `CANCELLED` first (per the scheduler's kill contract), then tears
    /// down any in-memory running task through `scheduler`, which also
    /// cascades the cancellation to pending successors.
    ///
    /// Returns `JobNotFound` for an unknown id and `JobNotOwned` for a job
    /// that belongs to a different user, per spec.md §6's 404/403 split for
    /// this endpoint (unlike workflow lookups, which collapse both cases
    /// into 404 — see DESIGN.md).
    #[instrument(skip(self, scheduler))]
    pub async fn cancel_job(
        &self,
        user_id: &UserId,
        job_id: JobId,
        scheduler: &SchedulerHandle,
    ) -> Result<CancelOutcome, WorkflowError> {
        let job = self
            .repo
            .get_job(job_id)
            .await
            .map_err(store_err)?
            .ok_or(ValidationError::JobNotFound(job_id))?;
        if &job.user_id != user_id {
            return Err(ValidationError::JobNotOwned(job_id).into());
        }
        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        let flipped = self
            .repo
            .mark_cancelled(job_id, Utc::now())
            .await
            .map_err(store_err)?;
        if !flipped {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        let was_running = scheduler.kill(job_id).await;
        Ok(CancelOutcome::Cancelled { was_running })
    }
}
