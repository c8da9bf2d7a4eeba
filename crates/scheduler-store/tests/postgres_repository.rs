//! Exercises `PostgresStore` against a real database.
//!
//! Ignored by default: these tests need `DATABASE_URL` pointed at a scratch
//! Postgres instance with CREATE/DROP privileges, the same opt-in the
//! in-memory suite in `repository.rs` avoids needing entirely. Run with
//! `cargo test --test postgres_repository -- --ignored`.

use scheduler_core::{JobStatus, JobType, UserId};
use scheduler_store::{PostgresStore, Repository};

async fn connect() -> PostgresStore {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a scratch Postgres instance for this test");
    let store = PostgresStore::connect(&url).await.expect("failed to connect/migrate");
    store.truncate_all().await.expect("failed to reset tables before test");
    store
}

#[tokio::test]
#[ignore = "requires a live Postgres instance (set DATABASE_URL)"]
async fn append_job_assigns_a_dense_order_index_under_postgres() {
    let store = connect().await;
    let user = UserId::from("pg-u1");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = store.get_or_create_branch(workflow.id, "b").await.unwrap();

    for i in 0..3 {
        store
            .append_job(
                workflow.id,
                &branch,
                user.clone(),
                JobType::PreviewDownsample,
                format!("in-{i}"),
                format!("out-{i}"),
            )
            .await
            .unwrap();
    }

    let jobs = store.list_jobs_for_workflow(workflow.id).await.unwrap();
    let mut indices: Vec<i32> = jobs.iter().map(|j| j.order_index).collect();
    indices.sort();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
#[ignore = "requires a live Postgres instance (set DATABASE_URL)"]
async fn cascade_cancel_propagates_past_a_failure_under_postgres() {
    let store = connect().await;
    let user = UserId::from("pg-u2");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = store.get_or_create_branch(workflow.id, "b").await.unwrap();

    let mut jobs = Vec::new();
    for i in 0..3 {
        jobs.push(
            store
                .append_job(
                    workflow.id,
                    &branch,
                    user.clone(),
                    JobType::TissueMask,
                    format!("in-{i}"),
                    format!("out-{i}"),
                )
                .await
                .unwrap(),
        );
    }

    store.mark_running(jobs[0].id, chrono::Utc::now()).await.unwrap();
    store.mark_succeeded(jobs[0].id, chrono::Utc::now()).await.unwrap();
    store.mark_running(jobs[1].id, chrono::Utc::now()).await.unwrap();
    store.mark_failed(jobs[1].id, chrono::Utc::now()).await.unwrap();

    let changed = store.cascade_cancel().await.unwrap();
    assert_eq!(changed, 1);

    let reloaded = store.get_job(jobs[2].id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, JobStatus::Cancelled);

    assert_eq!(store.cascade_cancel().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a live Postgres instance (set DATABASE_URL)"]
async fn concurrent_appends_to_one_branch_never_collide_on_order_index() {
    let store = std::sync::Arc::new(connect().await);
    let user = UserId::from("pg-u3");
    let workflow = store.create_workflow(user.clone(), "w".to_string()).await.unwrap();
    let branch = std::sync::Arc::new(store.get_or_create_branch(workflow.id, "b").await.unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let branch = branch.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move {
            store
                .append_job(
                    workflow.id,
                    &branch,
                    user,
                    JobType::PreviewDownsample,
                    format!("in-{i}"),
                    format!("out-{i}"),
                )
                .await
                .unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let jobs = store.list_jobs_for_workflow(workflow.id).await.unwrap();
    let mut indices: Vec<i32> = jobs.iter().map(|j| j.order_index).collect();
    indices.sort();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
}
