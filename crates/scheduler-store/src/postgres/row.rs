use chrono::{DateTime, Utc};
use scheduler_core::{BranchId, Job, JobId, JobStatus, JobType, UserId, WorkflowId};
use uuid::Uuid;

use crate::error::StoreError;

/// Wire shape of a `jobs` row. `status` and `job_type` are stored as text,
/// not a native Postgres enum, so they round-trip through [`JobStatus`] and
/// [`JobType`]'s own parsers rather than `sqlx`'s derive.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub branch_id: Uuid,
    pub user_id: String,
    pub job_type: String,
    pub input_path: String,
    pub output_path: String,
    pub status: String,
    pub progress: f64,
    pub order_index: i32,
    pub total_tiles: Option<i32>,
    pub processed_tiles: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("unrecognized job status {:?}", row.status))
        })?;
        Ok(Job {
            id: JobId(row.id),
            workflow_id: WorkflowId(row.workflow_id),
            branch_id: BranchId(row.branch_id),
            user_id: UserId(row.user_id),
            job_type: JobType::parse(&row.job_type),
            input_path: row.input_path,
            output_path: row.output_path,
            status,
            progress: row.progress,
            order_index: row.order_index,
            total_tiles: row.total_tiles,
            processed_tiles: row.processed_tiles,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}
