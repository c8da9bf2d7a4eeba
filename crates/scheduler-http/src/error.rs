use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use scheduler_core::{ValidationError, WorkflowError};
use serde_json::json;

/// Maps [`WorkflowError`] onto HTTP status codes: validation failures are
/// 400/403/404, anything else is a 500 that gets logged rather than leaked
/// to the caller.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(ValidationError::WorkflowNotFound(id)) => ApiError {
                status: StatusCode::NOT_FOUND,
                message: format!("workflow {id} not found"),
            },
            WorkflowError::Validation(ValidationError::JobNotFound(id)) => ApiError {
                status: StatusCode::NOT_FOUND,
                message: format!("job {id} not found"),
            },
            WorkflowError::Validation(ValidationError::JobNotOwned(id)) => ApiError {
                status: StatusCode::FORBIDDEN,
                message: format!("job {id} is not owned by the caller"),
            },
            WorkflowError::Validation(ValidationError::UnknownJobType(tag)) => ApiError {
                status: StatusCode::BAD_REQUEST,
                message: format!("unknown job type {tag:?}"),
            },
            WorkflowError::Store(err) => {
                tracing::error!(error = %err, "store error while handling request");
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}
