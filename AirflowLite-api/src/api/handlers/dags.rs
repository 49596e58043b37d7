use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use tracing::{error, info, instrument};

use airflow_lite_domain::services::DagRunServiceError;

use super::json_error;
use crate::api::state::AppState;
use crate::entities::common::MessageResponse;
use crate::entities::dags::{DagDetailResponse, DagOverviewResponse, DagRunResponse, TriggerResponse};
use crate::views;

pub const TRIGGERED: &str = "Triggered and running in background";
pub const DAG_NOT_FOUND: &str = "DAG Not Found";

/// List every registered DAG with its latest run
#[utoipa::path(
    get,
    path = "/api/v1/dags",
    responses(
        (status = 200, description = "Registered DAGs", body = [DagOverviewResponse]),
        (status = 401, description = "Missing or invalid credentials")
    ),
    tag = "dags"
)]
#[instrument(skip(state))]
pub async fn list_dags(State(state): State<AppState>) -> Json<Vec<DagOverviewResponse>> {
    let overviews = state.runs.dashboard().await;
    Json(overviews.into_iter().map(Into::into).collect())
}

/// Get a DAG definition and its run history
#[utoipa::path(
    get,
    path = "/api/v1/dags/{dag_id}",
    params(("dag_id" = String, Path, description = "DAG identifier")),
    responses(
        (status = 200, description = "DAG definition and runs, newest first", body = DagDetailResponse),
        (status = 404, description = "Unknown DAG", body = ErrorResponse)
    ),
    tag = "dags"
)]
#[instrument(skip(state))]
pub async fn get_dag(State(state): State<AppState>, Path(dag_id): Path<String>) -> Response {
    let Some(dag) = state.runs.get_dag(&dag_id) else {
        return json_error(&DagRunServiceError::DagNotFound(dag_id));
    };

    match state.runs.list_runs(&dag_id).await {
        Ok(runs) => Json(DagDetailResponse::new(&dag, runs)).into_response(),
        Err(e) => json_error(&e),
    }
}

/// Get the metadata of a DAG run
#[utoipa::path(
    get,
    path = "/api/v1/dags/{dag_id}/runs/{run_id}",
    params(
        ("dag_id" = String, Path, description = "DAG identifier"),
        ("run_id" = String, Path, description = "Run identifier")
    ),
    responses(
        (status = 200, description = "Run metadata", body = DagRunResponse),
        (status = 404, description = "Run not found or metadata corrupted", body = ErrorResponse)
    ),
    tag = "runs"
)]
#[instrument(skip(state))]
pub async fn get_run(
    State(state): State<AppState>,
    Path((dag_id, run_id)): Path<(String, String)>,
) -> Response {
    match state.runs.get_run(&dag_id, &run_id).await {
        Ok(run) => Json(DagRunResponse::from(run)).into_response(),
        Err(e) => json_error(&e),
    }
}

/// Get the raw log of a task instance
#[utoipa::path(
    get,
    path = "/api/v1/dags/{dag_id}/runs/{run_id}/tasks/{task_id}/log",
    params(
        ("dag_id" = String, Path, description = "DAG identifier"),
        ("run_id" = String, Path, description = "Run identifier"),
        ("task_id" = String, Path, description = "Task identifier")
    ),
    responses(
        (status = 200, description = "Task log", body = String, content_type = "text/plain"),
        (status = 404, description = "Task log not found", body = ErrorResponse)
    ),
    tag = "runs"
)]
#[instrument(skip(state))]
pub async fn get_task_log(
    State(state): State<AppState>,
    Path((dag_id, run_id, task_id)): Path<(String, String, String)>,
) -> Response {
    match state.runs.get_task_log(&dag_id, &run_id, &task_id).await {
        Ok(log) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            log,
        )
            .into_response(),
        Err(e) => json_error(&e),
    }
}

/// Trigger a DAG run.
///
/// Browsers get an HTML result page. Clients sending
/// `Accept: application/json` get a JSON body instead.
#[utoipa::path(
    post,
    path = "/api/v1/dags/{dag_id}/trigger",
    params(("dag_id" = String, Path, description = "DAG identifier")),
    responses(
        (status = 200, description = "Run started in the background", body = TriggerResponse),
        (status = 404, description = "Unknown DAG"),
        (status = 500, description = "Run could not be started", body = MessageResponse)
    ),
    tag = "dags"
)]
#[instrument(skip(state, headers))]
pub async fn trigger_dag(
    State(state): State<AppState>,
    Path(dag_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let json = wants_json(&headers);

    match state.runs.trigger(&dag_id).await {
        Ok(run_id) => {
            let run_url = absolute_url(&headers, &format!("/dags/{}/runs/{}", dag_id, run_id));
            info!("Triggered DAG {} as run {}", dag_id, run_id);

            if json {
                Json(TriggerResponse {
                    dag_id,
                    run_id,
                    run_url,
                })
                .into_response()
            } else {
                Html(views::trigger_result(&dag_id, TRIGGERED, Some(&run_id), Some(&run_url)))
                    .into_response()
            }
        }
        Err(e @ DagRunServiceError::DagNotFound(_)) => {
            if json {
                json_error(&e)
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Html(views::trigger_result(&dag_id, DAG_NOT_FOUND, None, None)),
                )
                    .into_response()
            }
        }
        Err(e) => {
            error!("Error triggering DAG {}: {}", dag_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse {
                    message: format!("Error triggering DAG '{}': {}", dag_id, e),
                }),
            )
                .into_response()
        }
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |accept| accept.contains("application/json"))
}

/// Absolute URL for `path` as seen by the client, honouring proxy headers
pub fn absolute_url(headers: &HeaderMap, path: &str) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let scheme = header_value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = header_value("x-forwarded-host")
        .or_else(|| header_value(header::HOST.as_str()))
        .unwrap_or_else(|| "localhost".to_string());

    format!("{}://{}{}", scheme, host, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_absolute_url_from_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com:8080"));
        assert_eq!(
            absolute_url(&headers, "/dags/etl/runs/r1"),
            "http://example.com:8080/dags/etl/runs/r1"
        );
    }

    #[test]
    fn test_absolute_url_behind_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("10.0.0.4:8080"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("airflow.example.com"));
        assert_eq!(
            absolute_url(&headers, "/dags/etl/runs/r1"),
            "https://airflow.example.com/dags/etl/runs/r1"
        );
    }

    #[test]
    fn test_wants_json() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(wants_json(&headers));
    }
}
