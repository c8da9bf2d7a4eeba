use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{Branch, Job, JobId, JobType, UserId, Workflow, WorkflowId};

use crate::error::StoreResult;

/// Query primitives the Scheduler and Workflow Service are built on.
///
/// Every method is a single atomic operation against the Store; callers
/// never hold state across calls. Implementations must make
/// [`Repository::append_job`] and [`Repository::cascade_cancel`] safe under
/// concurrent replicas (a transactional read-then-write or a unique
/// constraint with retry, never an in-process mutex).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// Distinct users with at least one job in `PENDING` or `RUNNING`,
    /// ordered by the earliest `created_at` among each user's incomplete
    /// jobs. The Scheduler admits from this list in order, which is what
    /// makes admission fairness FIFO-by-creation rather than arbitrary.
    async fn incomplete_users(&self) -> StoreResult<Vec<UserId>>;

    /// `PENDING` jobs owned by one of `allowed_users` whose in-branch
    /// predecessor is satisfied, ordered ascending by `created_at`.
    ///
    /// Must return an empty list when `allowed_users` is empty.
    async fn runnable(&self, allowed_users: &[UserId]) -> StoreResult<Vec<Job>>;

    /// Cancels every `PENDING` job whose in-branch predecessor is `FAILED`
    /// or `CANCELLED`. Returns the number of rows changed.
    async fn cascade_cancel(&self) -> StoreResult<u64>;

    async fn get_or_create_branch(&self, workflow_id: WorkflowId, name: &str) -> StoreResult<Branch>;

    /// Appends a job to the tail of `branch`, assigning the next dense
    /// `order_index`.
    #[allow(clippy::too_many_arguments)]
    async fn append_job(
        &self,
        workflow_id: WorkflowId,
        branch: &Branch,
        user_id: UserId,
        job_type: JobType,
        input_path: String,
        output_path: String,
    ) -> StoreResult<Job>;

    async fn create_workflow(&self, user_id: UserId, name: String) -> StoreResult<Workflow>;

    async fn get_workflow(&self, id: WorkflowId) -> StoreResult<Option<Workflow>>;

    async fn list_workflows(&self, user_id: &UserId) -> StoreResult<Vec<Workflow>>;

    /// Jobs belonging to a workflow, ordered by branch then `order_index`.
    async fn list_jobs_for_workflow(&self, workflow_id: WorkflowId) -> StoreResult<Vec<Job>>;

    /// The predecessor of `job` within its branch, if any (`order_index - 1`).
    async fn predecessor(&self, job: &Job) -> StoreResult<Option<Job>>;

    async fn mark_running(&self, id: JobId, started_at: DateTime<Utc>) -> StoreResult<()>;

    /// Flips a job to `SUCCEEDED` only if it is still `RUNNING`, so a body
    /// that finishes after the row has already been cancelled out from
    /// under it can't clobber a terminal status.
    async fn mark_succeeded(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<()>;

    /// Flips a job to `FAILED` only if it is still `RUNNING` (see
    /// [`Repository::mark_succeeded`]).
    async fn mark_failed(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<()>;

    /// Flips a job to `CANCELLED` unless it is already terminal. Returns
    /// `true` if this call performed the transition.
    async fn mark_cancelled(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<bool>;

    async fn update_progress(
        &self,
        id: JobId,
        progress: f64,
        processed_tiles: Option<i32>,
        total_tiles: Option<i32>,
    ) -> StoreResult<()>;

    /// Clears all persisted workflows, branches, and jobs. Called once at
    /// process startup, before the scheduler loop is spawned.
    async fn truncate_all(&self) -> StoreResult<()>;
}
