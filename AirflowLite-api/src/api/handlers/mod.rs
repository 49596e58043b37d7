pub mod dags;
pub mod health;
pub mod ui;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use airflow_lite_domain::services::DagRunServiceError;

use crate::entities::common::ErrorResponse;

pub const RUN_NOT_FOUND: &str = "DAG Run not found or metadata corrupted.";
pub const LOG_NOT_FOUND: &str = "Task log not found.";

/// Status, error code and user facing text of a service error
pub fn describe_error(err: &DagRunServiceError) -> (StatusCode, &'static str, String) {
    match err {
        DagRunServiceError::DagNotFound(dag_id) => (
            StatusCode::NOT_FOUND,
            "dag_not_found",
            format!("DAG with ID '{}' not found", dag_id),
        ),
        DagRunServiceError::RunNotFound { .. } | DagRunServiceError::Corrupted { .. } => {
            (StatusCode::NOT_FOUND, "run_not_found", RUN_NOT_FOUND.to_string())
        }
        DagRunServiceError::LogNotFound { .. } => {
            (StatusCode::NOT_FOUND, "log_not_found", LOG_NOT_FOUND.to_string())
        }
        other => {
            error!("Request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                other.to_string(),
            )
        }
    }
}

/// JSON error body for API clients
pub fn json_error(err: &DagRunServiceError) -> Response {
    let (status, code, message) = describe_error(err);
    (status, Json(ErrorResponse::new(code, message))).into_response()
}

/// Plain text error for UI pages
pub fn text_error(err: &DagRunServiceError) -> Response {
    let (status, _, message) = describe_error(err);
    (status, message).into_response()
}
