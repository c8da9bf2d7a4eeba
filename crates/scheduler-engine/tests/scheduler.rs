//! End-to-end scenarios for the Scheduler control loop, run against an
//! [`InMemoryStore`] so no live Postgres instance is required: a linear
//! branch running to completion, two branches running in parallel, cascade
//! cancellation after a failure, a hard cancel mid-run, and per-user
//! admission fairness.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{BranchId, JobStatus, JobType, UserId};
use scheduler_engine::{start_scheduler, SchedulerConfig, SchedulerEvent};
use scheduler_store::{InMemoryStore, Repository};

fn fast_config(max_workers: usize, max_active_users: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_workers,
        max_active_users,
        tick_interval: Duration::from_millis(20),
    }
}

fn tmp_output(label: &str) -> String {
    std::env::temp_dir()
        .join(format!("scheduler-engine-test-{label}-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

/// Polls `check()` every 10ms until it returns `true` or `timeout` elapses.
async fn wait_for<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn linear_branch_completes_jobs_in_order() {
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("u1");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = store.get_or_create_branch(workflow.id, "b").await.unwrap();

    let mut job_ids = Vec::new();
    for (job_type, label) in [
        (JobType::PreviewDownsample, "linear-0"),
        (JobType::TissueMask, "linear-1"),
        (JobType::PreviewDownsample, "linear-2"),
    ] {
        let job = store
            .append_job(workflow.id, &branch, user.clone(), job_type, "in".to_string(), tmp_output(label))
            .await
            .unwrap();
        job_ids.push(job.id);
    }

    let scheduler = start_scheduler(store.clone(), fast_config(4, 4));

    let all_succeeded = wait_for(
        || {
            let store = store.clone();
            let job_ids = job_ids.clone();
            async move {
                for id in &job_ids {
                    match store.get_job(*id).await.unwrap() {
                        Some(j) if j.status == JobStatus::Succeeded => {}
                        _ => return false,
                    }
                }
                true
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(all_succeeded, "expected all three jobs in the branch to succeed");

    for id in &job_ids {
        let job = store.get_job(*id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress, 1.0);
        assert!(job.finished_at.is_some());
    }

    scheduler.request_stop();
    scheduler.wait().await.unwrap();
}

#[tokio::test]
async fn parallel_branches_each_run_at_most_one_job_at_a_time() {
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("u1");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();

    let mut branch_ids = Vec::new();
    let mut job_ids = Vec::new();
    for branch_name in ["b1", "b2"] {
        let branch = store.get_or_create_branch(workflow.id, branch_name).await.unwrap();
        branch_ids.push(branch.id);
        for i in 0..2 {
            let job = store
                .append_job(
                    workflow.id,
                    &branch,
                    user.clone(),
                    JobType::TissueMask,
                    "in".to_string(),
                    tmp_output(&format!("{branch_name}-{i}")),
                )
                .await
                .unwrap();
            job_ids.push(job.id);
        }
    }

    let scheduler = start_scheduler(store.clone(), fast_config(2, 4));

    // Two worker slots, two independent branches: at some point both slots
    // should be occupied by one job from each branch.
    let saw_one_job_per_branch = wait_for(
        || {
            let running = scheduler.running_jobs();
            let branch_ids = branch_ids.clone();
            let store = store.clone();
            async move {
                if running.len() != 2 {
                    return false;
                }
                let mut branches_seen: HashSet<BranchId> = HashSet::new();
                for id in running {
                    if let Some(job) = store.get_job(id).await.unwrap() {
                        branches_seen.insert(job.branch_id);
                    }
                }
                branches_seen.len() == 2 && branches_seen.iter().all(|b| branch_ids.contains(b))
            }
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(saw_one_job_per_branch, "expected one running job per branch");

    let all_settled = wait_for(
        || {
            let store = store.clone();
            let job_ids = job_ids.clone();
            async move {
                for id in &job_ids {
                    match store.get_job(*id).await.unwrap() {
                        Some(j) if j.status.is_terminal() => {}
                        _ => return false,
                    }
                }
                true
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(all_settled);

    scheduler.request_stop();
    scheduler.wait().await.unwrap();
}

#[tokio::test]
async fn cascade_cancel_follows_a_failed_job_within_the_next_tick() {
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("u1");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = store.get_or_create_branch(workflow.id, "b").await.unwrap();

    let job0 = store
        .append_job(workflow.id, &branch, user.clone(), JobType::PreviewDownsample, "in".into(), tmp_output("cascade-0"))
        .await
        .unwrap();
    // None of the known job bodies raise on their own, so an unknown type
    // (rejected at submission time by the Workflow Service, but not by the
    // Repository) is the Job Runtime's only deterministic route to FAILED.
    let job1 = store
        .append_job(
            workflow.id,
            &branch,
            user.clone(),
            JobType::Unknown("denoise".to_string()),
            "in".into(),
            tmp_output("cascade-1"),
        )
        .await
        .unwrap();
    let job2 = store
        .append_job(workflow.id, &branch, user.clone(), JobType::PreviewDownsample, "in".into(), tmp_output("cascade-2"))
        .await
        .unwrap();

    let scheduler = start_scheduler(store.clone(), fast_config(4, 4));

    let all_settled = wait_for(
        || {
            let store = store.clone();
            async move {
                let j0 = store.get_job(job0.id).await.unwrap().unwrap();
                let j1 = store.get_job(job1.id).await.unwrap().unwrap();
                let j2 = store.get_job(job2.id).await.unwrap().unwrap();
                j0.status.is_terminal() && j1.status.is_terminal() && j2.status.is_terminal()
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(all_settled);

    assert_eq!(store.get_job(job0.id).await.unwrap().unwrap().status, JobStatus::Succeeded);
    assert_eq!(store.get_job(job1.id).await.unwrap().unwrap().status, JobStatus::Failed);
    assert_eq!(store.get_job(job2.id).await.unwrap().unwrap().status, JobStatus::Cancelled);

    scheduler.request_stop();
    scheduler.wait().await.unwrap();
}

#[tokio::test]
async fn hard_cancel_stops_an_in_flight_job_and_progress_writes_stop() {
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("u1");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = store.get_or_create_branch(workflow.id, "b").await.unwrap();

    // Sized so the cell-segmentation body estimates ~10 tiles, giving the
    // test a wide window to cancel mid-run (10ms/tile).
    let input = tmp_output("hardcancel-in");
    tokio::fs::write(&input, vec![0u8; 10 * 512 * 512]).await.unwrap();

    let job = store
        .append_job(
            workflow.id,
            &branch,
            user.clone(),
            JobType::InstansegCellSeg,
            input.clone(),
            tmp_output("hardcancel-out"),
        )
        .await
        .unwrap();

    let scheduler = start_scheduler(store.clone(), fast_config(4, 4));

    let started = wait_for(
        || {
            let store = store.clone();
            async move { matches!(store.get_job(job.id).await.unwrap(), Some(j) if j.status == JobStatus::Running) }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(started, "job should have started running");

    // Let it make some progress, then cancel mid-tile.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let flipped = store.mark_cancelled(job.id, chrono::Utc::now()).await.unwrap();
    assert!(flipped);
    let was_running = scheduler.kill(job.id).await;
    assert!(was_running, "the task handle should still have been in the running map");

    let cancelled = wait_for(
        || {
            let store = store.clone();
            async move { matches!(store.get_job(job.id).await.unwrap(), Some(j) if j.status == JobStatus::Cancelled) }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(cancelled);

    let final_job = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(final_job.status, JobStatus::Cancelled);
    assert!(final_job.finished_at.is_some());
    assert!(final_job.progress < 1.0);

    let progress_at_cancel = final_job.progress;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(
        store.get_job(job.id).await.unwrap().unwrap().progress,
        progress_at_cancel,
        "no progress write should land after the job is cancelled"
    );

    scheduler.request_stop();
    scheduler.wait().await.unwrap();
    let _ = tokio::fs::remove_file(&input).await;
}

#[tokio::test]
async fn cancelling_a_single_checkpoint_job_after_its_checkpoint_does_not_resurrect_it_as_succeeded() {
    // PreviewDownsample (like TissueMask) checks its cancellation token only
    // once, before its sleep+write; a cancel landing right after that single
    // checkpoint must not let the body's normal `Ok(())` completion stomp
    // the row back to SUCCEEDED.
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::from("u1");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = store.get_or_create_branch(workflow.id, "b").await.unwrap();

    let job = store
        .append_job(
            workflow.id,
            &branch,
            user.clone(),
            JobType::PreviewDownsample,
            "in".to_string(),
            tmp_output("checkpoint-race-out"),
        )
        .await
        .unwrap();

    let scheduler = start_scheduler(store.clone(), fast_config(4, 4));

    let started = wait_for(
        || {
            let store = store.clone();
            async move { matches!(store.get_job(job.id).await.unwrap(), Some(j) if j.status == JobStatus::Running) }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(started, "job should have started running");

    // Cancel immediately: the body's single checkpoint has already passed by
    // the time the scheduler dispatched it, so the body races to completion
    // regardless of this cancel.
    let flipped = store.mark_cancelled(job.id, chrono::Utc::now()).await.unwrap();
    assert!(flipped);
    scheduler.kill(job.id).await;

    // Give the body's sleep+write well past enough time to finish and for
    // `run_job_lifecycle` to attempt its terminal write.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let final_job = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(
        final_job.status,
        JobStatus::Cancelled,
        "a terminal CANCELLED row must never be overwritten by a late SUCCEEDED write"
    );

    scheduler.request_stop();
    scheduler.wait().await.unwrap();
}

#[tokio::test]
async fn single_active_user_slot_drains_the_earlier_user_before_admitting_the_next() {
    let store = Arc::new(InMemoryStore::new());
    let u1 = UserId::from("u1");
    let u2 = UserId::from("u2");

    let wf1 = store.create_workflow(u1.clone(), "w1".to_string()).await.unwrap();
    let b1 = store.get_or_create_branch(wf1.id, "b").await.unwrap();
    let mut u1_job_ids = Vec::new();
    for i in 0..3 {
        let job = store
            .append_job(wf1.id, &b1, u1.clone(), JobType::PreviewDownsample, "in".into(), tmp_output(&format!("fair-u1-{i}")))
            .await
            .unwrap();
        u1_job_ids.push(job.id);
    }

    // Ensure u1's jobs have a strictly earlier created_at than u2's.
    tokio::time::sleep(Duration::from_millis(5)).await;

    let wf2 = store.create_workflow(u2.clone(), "w2".to_string()).await.unwrap();
    let b2 = store.get_or_create_branch(wf2.id, "b").await.unwrap();
    let mut u2_job_ids = Vec::new();
    for i in 0..3 {
        let job = store
            .append_job(wf2.id, &b2, u2.clone(), JobType::PreviewDownsample, "in".into(), tmp_output(&format!("fair-u2-{i}")))
            .await
            .unwrap();
        u2_job_ids.push(job.id);
    }

    let scheduler = start_scheduler(
        store.clone(),
        SchedulerConfig {
            max_workers: 4,
            max_active_users: 1,
            tick_interval: Duration::from_millis(20),
        },
    );
    // Subscribing before the control loop's first tick can run (this test
    // runs on the default current-thread runtime, so the spawned task gets
    // no chance to execute until this task's next await point) guarantees
    // no JobStarted event is missed.
    let mut events = scheduler.subscribe();

    let u1_set: HashSet<_> = u1_job_ids.iter().copied().collect();
    let mut started_order = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while started_order.len() < 6 {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(!remaining.is_zero(), "timed out waiting for all six jobs to start");
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(SchedulerEvent::JobStarted { job_id, .. })) => started_order.push(job_id),
            Ok(Ok(_)) => {}
            Ok(Err(_)) => panic!("scheduler event channel closed early"),
            Err(_) => panic!("timed out waiting for a JobStarted event"),
        }
    }

    let first_u2_position = started_order.iter().position(|id| !u1_set.contains(id)).expect("u2 must start eventually");
    assert_eq!(first_u2_position, 3, "all three of u1's jobs must start before any of u2's");
    assert!(started_order[..3].iter().all(|id| u1_set.contains(id)));
    assert!(started_order[3..].iter().all(|id| !u1_set.contains(id)));

    scheduler.request_stop();
    scheduler.wait().await.unwrap();
}
