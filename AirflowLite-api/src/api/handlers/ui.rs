//! HTML pages of the web UI.

use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Response},
};
use tracing::{info, instrument};

use airflow_lite_domain::services::DagRunServiceError;

use super::text_error;
use crate::api::state::AppState;
use crate::views;

/// Dashboard: every DAG and its latest run
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let overviews = state.runs.dashboard().await;
    info!("Rendering dashboard with {} DAG(s)", overviews.len());
    Html(views::dashboard(&overviews))
}

/// Run history of one DAG
#[instrument(skip(state))]
pub async fn dag_page(State(state): State<AppState>, Path(dag_id): Path<String>) -> Response {
    let Some(dag) = state.runs.get_dag(&dag_id) else {
        return text_error(&DagRunServiceError::DagNotFound(dag_id));
    };

    match state.runs.list_runs(&dag_id).await {
        Ok(runs) => Html(views::dag_detail(&dag, &runs)).into_response(),
        Err(e) => text_error(&e),
    }
}

/// Task table of one run
#[instrument(skip(state))]
pub async fn run_page(
    State(state): State<AppState>,
    Path((dag_id, run_id)): Path<(String, String)>,
) -> Response {
    match state.runs.get_run(&dag_id, &run_id).await {
        Ok(run) => Html(views::run_detail(&run)).into_response(),
        Err(e) => text_error(&e),
    }
}

/// Log of one task instance
#[instrument(skip(state))]
pub async fn log_page(
    State(state): State<AppState>,
    Path((dag_id, run_id, task_id)): Path<(String, String, String)>,
) -> Response {
    match state.runs.get_task_log(&dag_id, &run_id, &task_id).await {
        Ok(log) => Html(views::log_viewer(&dag_id, &run_id, &task_id, &log)).into_response(),
        Err(e) => text_error(&e),
    }
}
