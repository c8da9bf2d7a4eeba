//! Dispatch table mapping [`JobType`] to an async job body.
//!
//! A job body is a cancellable suspension: it yields at tile boundaries so
//! the Scheduler can interrupt it promptly, and it may commit intermediate
//! `progress` / `processed_tiles` updates through the [`Repository`], but it
//! never writes a terminal status itself — that transition belongs to the
//! Scheduler (see [`crate::scheduler`]).
//!
//! The actual image algorithms (tissue masking, cell segmentation,
//! thumbnailing) are an external collaborator's concern; these bodies model
//! their tiling and progress-reporting shape without depending on an image
//! decoding crate.

use std::time::Duration;

use scheduler_core::{Job, JobId, JobType};
use scheduler_store::Repository;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Tile edge length (pixels) used to estimate a slide's tile count from its
/// file size, mirroring the 512px tiling stride of the original job bodies.
const TILE_SIDE_BYTES: u64 = 512 * 512;

/// Commit a progress update at least this often while tiling.
const PROGRESS_COMMIT_EVERY_N_TILES: u32 = 5;

/// Failure modes of a job body run.
#[derive(Debug, Error)]
pub enum JobRuntimeError {
    /// The cancellation token fired before the body finished.
    #[error("job cancelled")]
    Cancelled,

    /// `job.job_type` was not one of the recognized variants.
    #[error("unknown job type {0:?}")]
    UnknownJobType(String),

    /// The body itself raised.
    #[error(transparent)]
    Body(#[from] anyhow::Error),
}

/// Runs the body for `job`, dispatching on its [`JobType`].
///
/// Returns `Ok(())` on normal completion, `Err(JobRuntimeError::Cancelled)`
/// if `cancel` fired before the body finished, and any other error as
/// [`JobRuntimeError::Body`] (the caller marks the job `FAILED`).
pub async fn run(
    job: &Job,
    repo: &dyn Repository,
    cancel: &CancellationToken,
) -> Result<(), JobRuntimeError> {
    match &job.job_type {
        JobType::TissueMask => tissue_mask(job, repo, cancel).await,
        JobType::InstansegCellSeg => instanseg_cell_seg(job, repo, cancel).await,
        JobType::PreviewDownsample => preview_downsample(job, repo, cancel).await,
        JobType::Unknown(tag) => Err(JobRuntimeError::UnknownJobType(tag.clone())),
    }
}

fn estimate_tile_count(input_path: &str) -> i32 {
    let bytes = std::fs::metadata(input_path).map(|m| m.len()).unwrap_or(0);
    let tiles = bytes.div_ceil(TILE_SIDE_BYTES).max(1);
    tiles.min(64) as i32
}

async fn write_output(output_path: &str, contents: &[u8]) -> Result<(), JobRuntimeError> {
    if let Some(parent) = std::path::Path::new(output_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| JobRuntimeError::Body(e.into()))?;
        }
    }
    tokio::fs::write(output_path, contents)
        .await
        .map_err(|e| JobRuntimeError::Body(e.into()))
}

/// A tile-boundary suspension point: bodies call this between units of work
/// so a cancel requested mid-run is observed promptly rather than only
/// after the whole body returns.
async fn checkpoint(cancel: &CancellationToken) -> Result<(), JobRuntimeError> {
    if cancel.is_cancelled() {
        return Err(JobRuntimeError::Cancelled);
    }
    tokio::task::yield_now().await;
    Ok(())
}

/// Downsamples a slide thumbnail into a single pass: grayscale then
/// threshold at 220 to separate tissue from background.
async fn tissue_mask(
    job: &Job,
    repo: &dyn Repository,
    cancel: &CancellationToken,
) -> Result<(), JobRuntimeError> {
    repo.update_progress(job.id, 0.1, Some(0), Some(1)).await?;
    checkpoint(cancel).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    write_output(&job.output_path, b"tissue-mask-placeholder").await?;

    repo.update_progress(job.id, 1.0, Some(1), Some(1)).await?;
    debug!(job_id = %job.id, "tissue mask generated");
    Ok(())
}

/// Tiles the slide and runs a per-tile segmentation pass, persisting
/// `progress` every [`PROGRESS_COMMIT_EVERY_N_TILES`] tiles.
async fn instanseg_cell_seg(
    job: &Job,
    repo: &dyn Repository,
    cancel: &CancellationToken,
) -> Result<(), JobRuntimeError> {
    let total_tiles = estimate_tile_count(&job.input_path);
    repo.update_progress(job.id, 0.0, Some(0), Some(total_tiles))
        .await?;

    let mut polygons = Vec::new();
    for tile in 0..total_tiles {
        checkpoint(cancel).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        polygons.push(format!("{{\"tile\":{tile}}}"));

        let processed = tile + 1;
        if processed % PROGRESS_COMMIT_EVERY_N_TILES as i32 == 0 || processed == total_tiles {
            let progress = processed as f64 / total_tiles as f64;
            repo.update_progress(job.id, progress, Some(processed), Some(total_tiles))
                .await?;
        }
    }

    let payload = format!("[{}]", polygons.join(","));
    write_output(&job.output_path, payload.as_bytes()).await?;
    debug!(job_id = %job.id, tiles = total_tiles, "cell segmentation finished");
    Ok(())
}

/// Emits a thumbnail in one pass.
async fn preview_downsample(
    job: &Job,
    repo: &dyn Repository,
    cancel: &CancellationToken,
) -> Result<(), JobRuntimeError> {
    checkpoint(cancel).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    write_output(&job.output_path, b"preview-thumbnail-placeholder").await?;
    repo.update_progress(job.id, 1.0, Some(1), Some(1)).await?;
    Ok(())
}
