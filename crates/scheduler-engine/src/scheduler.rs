//! The Scheduler: a single supervisor task that admits users, dispatches
//! runnable jobs onto worker slots, and reaps jobs cancelled or failed out
//! from under it.
//!
//! All mutable scheduling state (`active_users`, `running`) is owned by
//! this one task and never shared across a lock — cross-task communication
//! happens over the channels in [`crate::api`], the same shape the engine
//! control loop this is grounded on uses for its worker commands and event
//! stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::{BranchId, JobId, JobStatus};
use scheduler_store::Repository;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ControlCommand, SchedulerConfig, SchedulerEvent};
use crate::job_runtime::{self, JobRuntimeError};

struct RunningEntry {
    branch_id: BranchId,
    cancel: CancellationToken,
}

pub(crate) struct SchedulerRuntime {
    repo: Arc<dyn Repository>,
    config: SchedulerConfig,
    active_users: Vec<scheduler_core::UserId>,
    running: HashMap<JobId, RunningEntry>,
    tasks: JoinSet<JobId>,
    cmd_rx: mpsc::Receiver<ControlCommand>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    running_tx: watch::Sender<std::collections::HashSet<JobId>>,
    shutdown: CancellationToken,
}

impl SchedulerRuntime {
    pub(crate) fn new(
        repo: Arc<dyn Repository>,
        config: SchedulerConfig,
        cmd_rx: mpsc::Receiver<ControlCommand>,
        event_tx: broadcast::Sender<SchedulerEvent>,
        running_tx: watch::Sender<std::collections::HashSet<JobId>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repo,
            config,
            active_users: Vec::new(),
            running: HashMap::new(),
            tasks: JoinSet::new(),
            cmd_rx,
            event_tx,
            running_tx,
            shutdown,
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Publishes the current running-job set to anyone polling
    /// [`crate::SchedulerHandle::running_jobs`]. Called after every mutation
    /// of `self.running`.
    fn publish_running(&self) {
        self.running_tx.send_replace(self.running.keys().copied().collect());
    }

    pub(crate) async fn run(mut self) {
        info!(
            max_workers = self.config.max_workers,
            max_active_users = self.config.max_active_users,
            "scheduler starting"
        );
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("scheduler shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "scheduler tick failed; continuing");
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(res) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.handle_task_done(res).await;
                }
            }
        }

        for entry in self.running.values() {
            entry.cancel.cancel();
        }
        while self.tasks.join_next().await.is_some() {}
        info!("scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Kill { job_id, reply } => {
                let cancelled = self.kill(job_id).await;
                let _ = reply.send(cancelled);
            }
        }
    }

    /// Cancels an in-memory running task for `job_id`, then cascades.
    /// Mirrors the HTTP cancel path: the caller is expected to have already
    /// flipped the persisted row to `CANCELLED`.
    async fn kill(&mut self, job_id: JobId) -> bool {
        let had_running = if let Some(entry) = self.running.get(&job_id) {
            entry.cancel.cancel();
            true
        } else {
            false
        };
        if let Err(err) = self.repo.cascade_cancel().await {
            warn!(error = %err, "cascade_cancel after kill failed");
        }
        had_running
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.refresh_admission().await?;
        self.reap_zombies().await?;
        self.dispatch().await?;
        Ok(())
    }

    /// Step 1 + 2: drop users with no incomplete work, then admit from the
    /// busy set up to `max_active_users`, preferring earliest-`created_at`.
    async fn refresh_admission(&mut self) -> anyhow::Result<()> {
        let busy = self.repo.incomplete_users().await?;
        self.active_users.retain(|u| busy.contains(u));

        for user in &busy {
            if self.active_users.len() >= self.config.max_active_users {
                break;
            }
            if !self.active_users.contains(user) {
                self.active_users.push(user.clone());
                self.emit(SchedulerEvent::UserAdmitted { user_id: user.clone() });
            }
        }
        Ok(())
    }

    /// Step 3: cascade-cancel pending successors of failed/cancelled jobs,
    /// then reconcile the in-memory `running` map against that write.
    ///
    /// The reconciliation pass runs every tick rather than only when
    /// `cascade_cancel` changed a row: a `running` entry can also go
    /// terminal via the HTTP cancel path flipping a `RUNNING` row directly,
    /// which `cascade_cancel` never touches.
    async fn reap_zombies(&mut self) -> anyhow::Result<()> {
        self.repo.cascade_cancel().await?;

        let mut zombies = Vec::new();
        for (&job_id, _) in self.running.iter() {
            match self.repo.get_job(job_id).await? {
                Some(job) if job.status.is_terminal() => zombies.push(job_id),
                None => zombies.push(job_id),
                _ => {}
            }
        }
        let mut any_reaped = false;
        for job_id in zombies {
            if let Some(entry) = self.running.remove(&job_id) {
                entry.cancel.cancel();
                self.emit(SchedulerEvent::JobReaped { job_id });
                any_reaped = true;
            }
        }
        if any_reaped {
            self.publish_running();
        }
        Ok(())
    }

    /// Step 4: fill free worker slots with runnable jobs for admitted users.
    async fn dispatch(&mut self) -> anyhow::Result<()> {
        if self.running.len() >= self.config.max_workers || self.active_users.is_empty() {
            return Ok(());
        }

        let candidates = self.repo.runnable(&self.active_users).await?;
        let mut busy_branches: std::collections::HashSet<BranchId> =
            self.running.values().map(|e| e.branch_id).collect();
        let mut any_dispatched = false;

        for job in candidates {
            if self.running.len() >= self.config.max_workers {
                break;
            }
            if busy_branches.contains(&job.branch_id) {
                continue;
            }

            let now = Utc::now();
            self.repo.mark_running(job.id, now).await?;

            let cancel = CancellationToken::new();
            busy_branches.insert(job.branch_id);
            self.running.insert(
                job.id,
                RunningEntry {
                    branch_id: job.branch_id,
                    cancel: cancel.clone(),
                },
            );
            self.emit(SchedulerEvent::JobStarted {
                job_id: job.id,
                branch_id: job.branch_id,
            });

            let repo = self.repo.clone();
            let job_id = job.id;
            self.tasks.spawn(async move {
                run_job_lifecycle(repo, job, cancel).await;
                job_id
            });
            any_dispatched = true;
        }
        if any_dispatched {
            self.publish_running();
        }
        Ok(())
    }

    async fn handle_task_done(
        &mut self,
        res: Result<(tokio::task::Id, JobId), tokio::task::JoinError>,
    ) {
        let job_id = match res {
            Ok((_, job_id)) => job_id,
            Err(err) => {
                error!(error = %err, "job task panicked");
                return;
            }
        };
        if self.running.remove(&job_id).is_some() {
            self.emit(SchedulerEvent::JobSettled { job_id });
            self.publish_running();
        }
    }
}

/// Runs one job to completion inside its own task: executes the Job
/// Runtime body, then commits the terminal status transition the body
/// itself never writes.
async fn run_job_lifecycle(
    repo: Arc<dyn Repository>,
    job: scheduler_core::Job,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    let outcome = job_runtime::run(&job, repo.as_ref(), &cancel).await;

    match outcome {
        Ok(()) => {
            // A body without a tile-granular cancellation window (e.g. a
            // single checkpoint before its one unit of work) can still
            // observe Ok(()) after its row was flipped to CANCELLED out from
            // under it; mark_succeeded only writes while the row is still
            // RUNNING, so that race never resurrects a terminal status.
            let finished_at = Utc::now();
            if let Err(err) = repo.mark_succeeded(job_id, finished_at).await {
                error!(job_id = %job_id, error = %err, "failed to mark job succeeded");
            }
        }
        Err(JobRuntimeError::Cancelled) => {
            // Re-read before writing: the row may already be CANCELLED via
            // the HTTP cancel path, or still RUNNING if the scheduler's own
            // shutdown triggered this.
            match repo.get_job(job_id).await {
                Ok(Some(row)) if row.status != JobStatus::Cancelled => {
                    let _ = repo.mark_cancelled(job_id, Utc::now()).await;
                }
                Ok(_) => {}
                Err(err) => error!(job_id = %job_id, error = %err, "failed to re-read cancelled job"),
            }
        }
        Err(other) => {
            warn!(job_id = %job_id, error = %other, "job body failed");
            let finished_at = Utc::now();
            if let Err(err) = repo.mark_failed(job_id, finished_at).await {
                error!(job_id = %job_id, error = %err, "failed to mark job failed");
            }
        }
    }
}
