use std::sync::Arc;

use airflow_lite_data::repository::{DagRunRepository, DagRunRepositoryTrait};
use airflow_lite_data::storage::SharedObjectStore;
use airflow_lite_domain::auth::Credentials;
use airflow_lite_domain::config::AppConfig;
use airflow_lite_domain::health::{HealthService, HealthServiceTrait};
use airflow_lite_domain::registry::DagRegistry;
use airflow_lite_domain::services::{DagExecutor, DagRunService, DagRunServiceTrait, QueryRunner};

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<dyn DagRunServiceTrait>,
    pub health: Arc<dyn HealthServiceTrait>,
    pub credentials: Arc<Credentials>,
    /// Reported by the health endpoint
    pub environment: String,
}

impl AppState {
    /// Wire the services over an object store and a query runner
    pub fn build(
        config: &AppConfig,
        store: SharedObjectStore,
        runner: Arc<dyn QueryRunner>,
        registry: DagRegistry,
    ) -> Self {
        let registry = Arc::new(registry);
        let repository: Arc<dyn DagRunRepositoryTrait> = Arc::new(DagRunRepository::new(store));
        let executor = DagExecutor::new(repository.clone(), runner, config.max_parallel_tasks);

        Self {
            runs: Arc::new(DagRunService::new(
                registry.clone(),
                repository.clone(),
                executor,
            )),
            health: Arc::new(HealthService::new(
                repository,
                registry,
                config.storage.describe(),
            )),
            credentials: Arc::new(Credentials::from(&config.auth)),
            environment: config.environment.clone(),
        }
    }
}
