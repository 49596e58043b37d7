//! Domain layer health check functionality
//! Reports on the run store and the DAG registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use airflow_lite_data::repository::DagRunRepositoryTrait;

use crate::registry::DagRegistry;

/// System health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    /// All components are healthy
    Healthy,
    /// Some components are degraded but the system is functional
    Degraded,
    /// System is not functioning properly
    Unhealthy,
}

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Represents a health component with status and optional details
#[derive(Debug, Clone)]
pub struct HealthComponent {
    pub status: ComponentStatus,
    pub details: Option<String>,
}

/// Represents the overall health of the system
#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub status: SystemStatus,
    /// Map of component names to their health status
    pub components: HashMap<String, HealthComponent>,
}

/// Trait for health services
#[async_trait]
pub trait HealthServiceTrait: Send + Sync {
    /// Get the overall system health
    async fn get_system_health(&self) -> SystemHealth;

    /// Check that the run store answers.
    /// Returns an error message if it does not.
    async fn check_storage_status(&self) -> Result<(), String>;
}

/// Health checks over the run store and registry
#[derive(Clone)]
pub struct HealthService {
    repository: Arc<dyn DagRunRepositoryTrait>,
    registry: Arc<DagRegistry>,
    storage_location: String,
}

impl HealthService {
    pub fn new(
        repository: Arc<dyn DagRunRepositoryTrait>,
        registry: Arc<DagRegistry>,
        storage_location: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            registry,
            storage_location: storage_location.into(),
        }
    }
}

/// Worst component status decides the overall status
fn overall_status<'a>(components: impl IntoIterator<Item = &'a HealthComponent>) -> SystemStatus {
    let mut status = SystemStatus::Healthy;
    for component in components {
        match component.status {
            ComponentStatus::Unhealthy => return SystemStatus::Unhealthy,
            ComponentStatus::Degraded => status = SystemStatus::Degraded,
            ComponentStatus::Healthy => {}
        }
    }
    status
}

#[async_trait]
impl HealthServiceTrait for HealthService {
    async fn get_system_health(&self) -> SystemHealth {
        let storage = match self.check_storage_status().await {
            Ok(()) => HealthComponent {
                status: ComponentStatus::Healthy,
                details: Some(self.storage_location.clone()),
            },
            Err(e) => HealthComponent {
                status: ComponentStatus::Unhealthy,
                details: Some(e),
            },
        };

        let registry = if self.registry.is_empty() {
            HealthComponent {
                status: ComponentStatus::Degraded,
                details: Some("No DAGs registered".to_string()),
            }
        } else {
            HealthComponent {
                status: ComponentStatus::Healthy,
                details: Some(format!("{} DAG(s) registered", self.registry.len())),
            }
        };

        let components: HashMap<String, HealthComponent> = [
            ("storage".to_string(), storage),
            ("dag_registry".to_string(), registry),
        ]
        .into_iter()
        .collect();

        SystemHealth {
            status: overall_status(components.values()),
            components,
        }
    }

    async fn check_storage_status(&self) -> Result<(), String> {
        self.repository
            .ping()
            .await
            .map_err(|e| format!("Storage unavailable at {}: {}", self.storage_location, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airflow_lite_data::repository::DagRunRepository;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_healthy_with_memory_store() {
        let repository = Arc::new(DagRunRepository::new(Arc::new(InMemory::new())));
        let service = HealthService::new(repository, Arc::new(DagRegistry::builtin()), "memory://");

        let health = service.get_system_health().await;
        assert_eq!(health.status, SystemStatus::Healthy);
        assert!(health.components.contains_key("storage"));
        assert_eq!(
            health.components["dag_registry"].details.as_deref(),
            Some("1 DAG(s) registered")
        );
    }

    #[tokio::test]
    async fn test_empty_registry_is_degraded() {
        let repository = Arc::new(DagRunRepository::new(Arc::new(InMemory::new())));
        let service = HealthService::new(repository, Arc::new(DagRegistry::new()), "memory://");

        assert_eq!(service.get_system_health().await.status, SystemStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_wins() {
        let components = [
            HealthComponent {
                status: ComponentStatus::Degraded,
                details: None,
            },
            HealthComponent {
                status: ComponentStatus::Unhealthy,
                details: None,
            },
        ];
        assert_eq!(overall_status(components.iter()), SystemStatus::Unhealthy);
    }
}
