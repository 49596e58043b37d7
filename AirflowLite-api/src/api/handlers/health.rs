use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use airflow_lite_domain::health::{ComponentStatus, SystemStatus};

use crate::api::state::AppState;

/// Health check response model
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy", "degraded" or "unhealthy"
    pub status: String,
    /// Application version from the Cargo manifest
    pub version: String,
    /// Unix timestamp of the response
    pub timestamp: u64,
    /// Uptime of the service in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Status of each checked component
    pub components: BTreeMap<String, ComponentHealthStatus>,
    pub environment: String,
}

/// Health status for an individual component
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealthStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// Set once when the router is built
static SERVER_START_TIME: OnceCell<u64> = OnceCell::new();

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Record the server start time used for uptime reporting
pub fn initialize_server_start_time() {
    SERVER_START_TIME.get_or_init(unix_now);
}

fn system_status_label(status: SystemStatus) -> &'static str {
    match status {
        SystemStatus::Healthy => "healthy",
        SystemStatus::Degraded => "degraded",
        SystemStatus::Unhealthy => "unhealthy",
    }
}

fn component_status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

/// Health check endpoint, no authentication required
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 500, description = "Service is not healthy", body = HealthResponse),
        (status = 503, description = "Service is degraded", body = HealthResponse)
    ),
    tag = "health"
)]
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    info!("Health check requested");

    let now = unix_now();
    let uptime = SERVER_START_TIME.get().map(|&start| now.saturating_sub(start));
    let system_health = state.health.get_system_health().await;

    let components = system_health
        .components
        .into_iter()
        .map(|(name, component)| {
            (
                name,
                ComponentHealthStatus {
                    status: component_status_label(component.status).to_string(),
                    message: component.details,
                },
            )
        })
        .collect();

    let response = HealthResponse {
        status: system_status_label(system_health.status).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: now,
        uptime,
        components,
        environment: state.environment.clone(),
    };

    let code = match system_health.status {
        SystemStatus::Healthy => StatusCode::OK,
        SystemStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
        SystemStatus::Unhealthy => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(system_status_label(SystemStatus::Healthy), "healthy");
        assert_eq!(system_status_label(SystemStatus::Degraded), "degraded");
        assert_eq!(component_status_label(ComponentStatus::Unhealthy), "unhealthy");
    }

    #[test]
    fn test_start_time_is_set_once() {
        initialize_server_start_time();
        let first = SERVER_START_TIME.get().copied();
        initialize_server_start_time();
        assert_eq!(SERVER_START_TIME.get().copied(), first);
        assert!(first.is_some());
    }
}
