#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The HTTP Surface: an `axum::Router` translating workflow/job endpoints
//! into [`scheduler_service::WorkflowService`] and
//! [`scheduler_engine::SchedulerHandle`] calls.

mod auth;
mod error;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the workflow/job router, with a tracing layer over every request.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/workflows", get(routes::list_workflows).post(routes::create_workflow))
        .route("/api/workflows/:id", get(routes::get_workflow))
        .route("/api/workflows/:id/jobs", post(routes::add_job))
        .route("/api/jobs/:id/cancel", post(routes::cancel_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
