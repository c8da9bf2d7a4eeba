//! Double-`Ctrl+C` shutdown: the first signal asks the scheduler to stop
//! admitting new work and the HTTP listener to stop accepting connections;
//! a second signal before that finishes aborts the process immediately.

use std::future::Future;

/// Resolves once, either when the graceful signal has fired (for
/// `axum::serve(...).with_graceful_shutdown`) or — if a second `Ctrl+C`
/// arrives first — once the process has already exited via
/// [`std::process::exit`], in which case this future never resolves.
pub fn graceful_signal() -> impl Future<Output = ()> {
    async {
        wait_for_ctrl_c().await;
        tracing::info!("shutdown requested; finishing in-flight jobs (press Ctrl+C again to exit immediately)");

        tokio::spawn(async {
            wait_for_ctrl_c().await;
            tracing::warn!("second shutdown signal received; exiting immediately");
            std::process::exit(130);
        });
    }
}

async fn wait_for_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install Ctrl+C handler; shutdown must be signalled externally");
        std::future::pending::<()>().await;
    }
}
