//! Public API surface for the in-process Scheduler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{BranchId, JobId, UserId};
use scheduler_store::Repository;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Twin bounds the control loop enforces every tick.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running concurrently across the whole system.
    pub max_workers: usize,
    /// Maximum number of users holding an admission slot at once.
    pub max_active_users: usize,
    /// How long the control loop sleeps between ticks.
    pub tick_interval: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
}

pub(crate) enum ControlCommand {
    Kill {
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
}

/// Observability events emitted by the scheduler, mirroring the shape of
/// its in-memory transitions without exposing the transitions themselves.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A user was granted an admission slot.
    UserAdmitted {
        /// The admitted user.
        user_id: UserId,
    },
    /// A job was flipped to `RUNNING` and its task spawned.
    JobStarted {
        /// The job that started.
        job_id: JobId,
        /// The branch it belongs to.
        branch_id: BranchId,
    },
    /// A running job's task settled (succeeded, failed, or was cancelled).
    JobSettled {
        /// The job that settled.
        job_id: JobId,
    },
    /// A `running` entry was torn down because its persisted row had
    /// already gone terminal out from under the scheduler.
    JobReaped {
        /// The reaped job.
        job_id: JobId,
    },
}

/// Handle to a running Scheduler instance.
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<ControlCommand>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    running_rx: watch::Receiver<HashSet<JobId>>,
    shutdown: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Subscribe to the scheduler's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// The set of job ids currently occupying a worker slot, as of the most
    /// recent dispatch or settle. Cheap to poll; never blocks on the control
    /// loop.
    pub fn running_jobs(&self) -> HashSet<JobId> {
        self.running_rx.borrow().clone()
    }

    /// Requests cancellation of `job_id`'s in-memory task handle if it is
    /// currently running, then cascades. Returns whether a running handle
    /// was actually found and cancelled.
    ///
    /// The caller (the HTTP cancel handler) is responsible for flipping the
    /// persisted row to `CANCELLED` first; this only tears down the task.
    pub async fn kill(&self, job_id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ControlCommand::Kill { job_id, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Requests a graceful shutdown: the control loop stops admitting new
    /// work and cancels every running job's token.
    pub fn request_stop(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the control loop task to exit.
    pub async fn wait(self) -> Result<(), tokio::task::JoinError> {
        self.join.await
    }
}

/// Spawns the Scheduler control loop as a background task.
pub fn start_scheduler(repo: Arc<dyn Repository>, config: SchedulerConfig) -> SchedulerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(1024);
    let (running_tx, running_rx) = watch::channel(HashSet::new());
    let shutdown = CancellationToken::new();

    let runtime = crate::scheduler::SchedulerRuntime::new(
        repo,
        config,
        cmd_rx,
        event_tx.clone(),
        running_tx,
        shutdown.clone(),
    );
    let join = tokio::spawn(runtime.run());

    SchedulerHandle {
        cmd_tx,
        event_tx,
        running_rx,
        shutdown,
        join,
    }
}
