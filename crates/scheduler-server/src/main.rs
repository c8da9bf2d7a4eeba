mod config;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use scheduler_engine::start_scheduler;
use scheduler_http::AppState;
use scheduler_service::WorkflowService;
use scheduler_store::{PostgresStore, Repository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scheduler_server=info,scheduler_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    tracing::info!(
        max_workers = config.max_workers,
        max_active_users = config.max_active_users,
        bind_addr = %config.bind_addr,
        "starting scheduler server"
    );

    let store = PostgresStore::connect(&config.database_url).await?;

    // No crash-recovery of running jobs is attempted: every restart clears
    // the durable job tables before the scheduler loop starts, in one
    // transaction.
    store.truncate_all().await?;
    tracing::info!("cleared durable job tables for this run");

    let repo: Arc<dyn Repository> = Arc::new(store);
    let scheduler = Arc::new(start_scheduler(repo.clone(), config.scheduler_config()));
    let service = Arc::new(WorkflowService::new(repo));

    let app = scheduler_http::router(AppState { service, scheduler: scheduler.clone() });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::graceful_signal())
        .await?;

    scheduler.request_stop();
    match Arc::try_unwrap(scheduler) {
        Ok(scheduler) => scheduler.wait().await?,
        Err(_) => tracing::warn!("scheduler handle still shared at shutdown; skipping join"),
    }

    tracing::info!("scheduler server stopped");
    Ok(())
}
