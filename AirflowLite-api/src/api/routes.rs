use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::debug;

use airflow_lite_domain::auth::{basic_auth, configure_security};

use crate::api::handlers::{dags, health, ui};
use crate::api::state::AppState;
use crate::openapi::configure_swagger_routes;

/// Create the application router
pub fn create_app(state: AppState) -> Router {
    debug!("Creating application router");

    // JSON API and trigger endpoint
    let api_routes = Router::new()
        .route("/dags", get(dags::list_dags))
        .route("/dags/:dag_id", get(dags::get_dag))
        .route("/dags/:dag_id/trigger", post(dags::trigger_dag))
        .route("/dags/:dag_id/runs/:run_id", get(dags::get_run))
        .route(
            "/dags/:dag_id/runs/:run_id/tasks/:task_id/log",
            get(dags::get_task_log),
        );

    // Web UI and API, all behind Basic Auth
    let protected_routes = Router::new()
        .route("/", get(ui::index))
        .route("/dags/:dag_id", get(ui::dag_page))
        .route("/dags/:dag_id/runs/:run_id", get(ui::run_page))
        .route(
            "/dags/:dag_id/runs/:run_id/tasks/:task_id/log",
            get(ui::log_page),
        )
        .nest("/api/v1", api_routes)
        .route_layer(middleware::from_fn_with_state(
            state.credentials.clone(),
            basic_auth,
        ));

    debug!("Protected routes configured");

    let public_routes = Router::new().route("/health", get(health::health_check));

    let app = Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state);

    let app = add_swagger_ui(app);
    debug!("Swagger UI merged");

    let app = configure_security(app).layer(TraceLayer::new_for_http());
    debug!("Security configuration applied");

    health::initialize_server_start_time();
    app
}

/// Add Swagger UI to the router
pub fn add_swagger_ui(app: Router) -> Router {
    app.merge(configure_swagger_routes())
}
