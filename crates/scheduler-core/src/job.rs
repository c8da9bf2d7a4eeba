use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{BranchId, JobId, UserId, WorkflowId};

/// Lifecycle state of a [`Job`].
///
/// Terminal states (`Succeeded`, `Failed`, `Cancelled`) are absorbing: once
/// reached, no later transition may overwrite them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// The Postgres-side text representation (matches the `jobs.status` enum).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse the Postgres-side text representation.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }
}

/// The image-processing operation a job performs.
///
/// `Unknown` carries the rejected tag through to the HTTP layer so a
/// validation error can name it; the Job Runtime never executes it (the
/// service rejects unknown types at submission time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    TissueMask,
    InstansegCellSeg,
    PreviewDownsample,
    Unknown(String),
}

impl Serialize for JobType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("job type must not be empty"));
        }
        Ok(Self::parse(&s))
    }
}

impl JobType {
    /// Parse the wire/DB representation, never failing — unrecognized values
    /// become `Unknown` so callers can surface a validation error by name.
    pub fn parse(s: &str) -> Self {
        match s {
            "tissue_mask" => Self::TissueMask,
            "instanseg_cell_seg" => Self::InstansegCellSeg,
            "preview_downsample" => Self::PreviewDownsample,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TissueMask => "tissue_mask",
            Self::InstansegCellSeg => "instanseg_cell_seg",
            Self::PreviewDownsample => "preview_downsample",
            Self::Unknown(s) => s.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// One unit of work within a [`Branch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub workflow_id: WorkflowId,
    pub branch_id: BranchId,
    pub user_id: UserId,
    pub job_type: JobType,
    pub input_path: String,
    pub output_path: String,
    pub status: JobStatus,
    pub progress: f64,
    /// Position within the branch; dense, starting at 0, unique per branch.
    pub order_index: i32,
    pub total_tiles: Option<i32>,
    pub processed_tiles: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether this job may transition to `RUNNING` given its predecessor's
    /// status (`None` predecessor means this is the first job in its branch).
    pub fn is_runnable(&self, predecessor_status: Option<JobStatus>) -> bool {
        self.status == JobStatus::Pending
            && (self.order_index == 0 || predecessor_status == Some(JobStatus::Succeeded))
    }
}
