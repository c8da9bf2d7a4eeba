use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scheduler_core::{JobType, Workflow};
use scheduler_service::CancelOutcome;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
}

/// `GET /api/workflows`
pub async fn list_workflows(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    let workflows = state.service.list_workflows(&user_id).await?;
    Ok(Json(workflows))
}

/// `POST /api/workflows`
pub async fn create_workflow(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = state.service.create_workflow(user_id, req.name).await?;
    Ok(Json(workflow))
}

/// `GET /api/workflows/{id}`
pub async fn get_workflow(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<scheduler_service::WorkflowStatusReport>, ApiError> {
    let report = state
        .service
        .workflow_status(&user_id, workflow_id.into())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct AddJobRequest {
    pub branch_name: String,
    pub job_type: String,
    pub input_path: String,
    pub output_path: String,
}

/// `POST /api/workflows/{id}/jobs`
pub async fn add_job(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<AddJobRequest>,
) -> Result<Json<scheduler_core::Job>, ApiError> {
    let job_type = JobType::parse(&req.job_type);
    let job = state
        .service
        .add_job(
            user_id,
            workflow_id.into(),
            req.branch_name,
            job_type,
            req.input_path,
            req.output_path,
        )
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub already_terminal: bool,
    pub was_running: bool,
}

/// `POST /api/jobs/{id}/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = state
        .service
        .cancel_job(&user_id, job_id.into(), &state.scheduler)
        .await?;
    let response = match outcome {
        CancelOutcome::AlreadyTerminal => CancelResponse {
            already_terminal: true,
            was_running: false,
        },
        CancelOutcome::Cancelled { was_running } => CancelResponse {
            already_terminal: false,
            was_running,
        },
    };
    Ok(Json(response))
}
