use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Configure Swagger UI endpoints
pub fn configure_swagger_routes() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}

// API Documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        // Health endpoints
        crate::api::handlers::health::health_check,

        // DAG endpoints
        crate::api::handlers::dags::list_dags,
        crate::api::handlers::dags::get_dag,
        crate::api::handlers::dags::trigger_dag,

        // Run endpoints
        crate::api::handlers::dags::get_run,
        crate::api::handlers::dags::get_task_log
    ),
    components(
        schemas(
            crate::entities::common::ErrorResponse,
            crate::entities::common::MessageResponse,
            crate::entities::dags::TaskResponse,
            crate::entities::dags::RunSummaryResponse,
            crate::entities::dags::DagOverviewResponse,
            crate::entities::dags::DagDetailResponse,
            crate::entities::dags::TaskInstanceResponse,
            crate::entities::dags::DagRunResponse,
            crate::entities::dags::TriggerResponse,
            crate::api::handlers::health::HealthResponse,
            crate::api::handlers::health::ComponentHealthStatus
        )
    ),
    modifiers(&BasicAuthAddon),
    tags(
        (name = "health", description = "Health check endpoint"),
        (name = "dags", description = "DAG listing and triggering"),
        (name = "runs", description = "DAG run metadata and task logs")
    ),
    info(
        title = "Airflow Lite API",
        version = "0.1.0",
        description = "Trigger BigQuery DAGs and inspect their runs",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    security(
        ("basic_auth" = [])
    )
)]
pub struct ApiDoc;

/// Registers the HTTP Basic security scheme
struct BasicAuthAddon;

impl utoipa::Modify for BasicAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "basic_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Basic).build()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_doc_generation() {
        let openapi = ApiDoc::openapi();

        assert_eq!(openapi.info.title, "Airflow Lite API");
        assert_eq!(openapi.info.version, "0.1.0");

        let tags = openapi.tags.as_ref().unwrap();
        assert!(tags.iter().any(|tag| tag.name == "dags"));
        assert!(tags.iter().any(|tag| tag.name == "runs"));

        for path in [
            "/health",
            "/api/v1/dags",
            "/api/v1/dags/{dag_id}",
            "/api/v1/dags/{dag_id}/trigger",
            "/api/v1/dags/{dag_id}/runs/{run_id}",
            "/api/v1/dags/{dag_id}/runs/{run_id}/tasks/{task_id}/log",
        ] {
            assert!(openapi.paths.paths.contains_key(path), "missing {}", path);
        }

        let components = openapi.components.as_ref().unwrap();
        assert!(components.security_schemes.contains_key("basic_auth"));
    }

    #[test]
    fn test_schema_examples_are_published() {
        let document: serde_json::Value =
            serde_json::from_str(&ApiDoc::openapi().to_json().unwrap()).unwrap();
        let schemas = &document["components"]["schemas"];

        assert_eq!(
            schemas["ErrorResponse"]["properties"]["error"]["example"],
            "not_found"
        );
        assert_eq!(
            schemas["RunSummaryResponse"]["properties"]["status"]["example"],
            "SUCCESS"
        );
    }
}
