use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use airflow_lite_data::models::{DagRunMetadata, DagRunSummary};
use airflow_lite_data::repository::{DagRunRepositoryTrait, RepositoryError};

use crate::entities::Dag;
use crate::registry::DagRegistry;
use crate::services::executor::{DagExecutor, ExecutorError};

/// Run service errors
#[derive(Debug, Error)]
pub enum DagRunServiceError {
    /// No DAG registered under this id
    #[error("DAG with ID '{0}' not found")]
    DagNotFound(String),

    /// No metadata stored for the run
    #[error("DAG run '{run_id}' of DAG '{dag_id}' not found")]
    RunNotFound { dag_id: String, run_id: String },

    /// Metadata exists but cannot be decoded
    #[error("Metadata of DAG run '{run_id}' of DAG '{dag_id}' is corrupted")]
    Corrupted { dag_id: String, run_id: String },

    /// No log stored for the task
    #[error("Log of task '{task_id}' in run '{run_id}' not found")]
    LogNotFound {
        dag_id: String,
        run_id: String,
        task_id: String,
    },

    /// The run could not be started
    #[error(transparent)]
    Execution(#[from] ExecutorError),

    /// Storage failure
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// A registered DAG together with its most recent run
#[derive(Debug, Clone, Serialize)]
pub struct DagOverview {
    pub dag_id: String,
    pub schedule_interval: Option<String>,
    pub task_count: usize,
    pub latest_run: Option<DagRunSummary>,
}

/// Read and trigger operations on DAG runs
#[async_trait]
pub trait DagRunServiceTrait: Send + Sync {
    /// Registered DAGs in registration order
    fn dags(&self) -> Vec<Arc<Dag>>;

    fn get_dag(&self, dag_id: &str) -> Option<Arc<Dag>>;

    /// Start a run and return its id; the run continues in the background
    async fn trigger(&self, dag_id: &str) -> Result<String, DagRunServiceError>;

    async fn get_run(&self, dag_id: &str, run_id: &str) -> Result<DagRunMetadata, DagRunServiceError>;

    async fn get_task_log(&self, dag_id: &str, run_id: &str, task_id: &str) -> Result<String, DagRunServiceError>;

    /// Runs of a DAG, newest first
    async fn list_runs(&self, dag_id: &str) -> Result<Vec<DagRunSummary>, DagRunServiceError>;

    /// Every DAG with its latest run
    async fn dashboard(&self) -> Vec<DagOverview>;
}

/// Default implementation over the registry, repository and executor
#[derive(Clone)]
pub struct DagRunService {
    registry: Arc<DagRegistry>,
    repository: Arc<dyn DagRunRepositoryTrait>,
    executor: DagExecutor,
}

impl DagRunService {
    pub fn new(
        registry: Arc<DagRegistry>,
        repository: Arc<dyn DagRunRepositoryTrait>,
        executor: DagExecutor,
    ) -> Self {
        Self {
            registry,
            repository,
            executor,
        }
    }

    fn require_dag(&self, dag_id: &str) -> Result<Arc<Dag>, DagRunServiceError> {
        self.registry
            .get(dag_id)
            .ok_or_else(|| DagRunServiceError::DagNotFound(dag_id.to_string()))
    }

    /// Summary of a stored run; `None` when it is missing or unreadable
    async fn load_summary(&self, dag_id: &str, run_id: &str) -> Result<Option<DagRunSummary>, RepositoryError> {
        match self.repository.get_metadata(dag_id, run_id).await {
            Ok(metadata) => Ok(metadata.map(|m| m.summary())),
            Err(e @ RepositoryError::Corrupted { .. }) => {
                warn!("Skipping run {}: {}", run_id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Newest `start_time` first, ties broken by `run_id` descending
pub fn sort_newest_first(runs: &mut [DagRunSummary]) {
    runs.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| b.run_id.cmp(&a.run_id))
    });
}

#[async_trait]
impl DagRunServiceTrait for DagRunService {
    fn dags(&self) -> Vec<Arc<Dag>> {
        self.registry.dags()
    }

    fn get_dag(&self, dag_id: &str) -> Option<Arc<Dag>> {
        self.registry.get(dag_id)
    }

    #[instrument(skip(self))]
    async fn trigger(&self, dag_id: &str) -> Result<String, DagRunServiceError> {
        let dag = self.require_dag(dag_id)?;
        let run_id = self.executor.start(dag).await?;
        info!("DAG {} triggered, run id {}", dag_id, run_id);
        Ok(run_id)
    }

    #[instrument(skip(self))]
    async fn get_run(&self, dag_id: &str, run_id: &str) -> Result<DagRunMetadata, DagRunServiceError> {
        match self.repository.get_metadata(dag_id, run_id).await {
            Ok(Some(metadata)) => Ok(metadata),
            Ok(None) => Err(DagRunServiceError::RunNotFound {
                dag_id: dag_id.to_string(),
                run_id: run_id.to_string(),
            }),
            Err(RepositoryError::Corrupted { path, reason }) => {
                warn!("Corrupted run metadata at {}: {}", path, reason);
                Err(DagRunServiceError::Corrupted {
                    dag_id: dag_id.to_string(),
                    run_id: run_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn get_task_log(&self, dag_id: &str, run_id: &str, task_id: &str) -> Result<String, DagRunServiceError> {
        self.repository
            .get_task_log(dag_id, run_id, task_id)
            .await?
            .ok_or_else(|| DagRunServiceError::LogNotFound {
                dag_id: dag_id.to_string(),
                run_id: run_id.to_string(),
                task_id: task_id.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn list_runs(&self, dag_id: &str) -> Result<Vec<DagRunSummary>, DagRunServiceError> {
        self.require_dag(dag_id)?;

        let run_ids = self.repository.list_run_ids(dag_id).await?;
        let loaded = join_all(run_ids.iter().map(|run_id| self.load_summary(dag_id, run_id))).await;

        let mut runs = Vec::with_capacity(loaded.len());
        for summary in loaded {
            if let Some(summary) = summary? {
                runs.push(summary);
            }
        }

        sort_newest_first(&mut runs);
        Ok(runs)
    }

    async fn dashboard(&self) -> Vec<DagOverview> {
        let mut overviews = Vec::with_capacity(self.registry.len());

        for dag in self.registry.dags() {
            let latest_run = match self.list_runs(dag.dag_id()).await {
                Ok(runs) => runs.into_iter().next(),
                Err(e) => {
                    warn!("Could not load runs of DAG {}: {}", dag.dag_id(), e);
                    None
                }
            };

            overviews.push(DagOverview {
                dag_id: dag.dag_id().to_string(),
                schedule_interval: dag.schedule_interval().map(str::to_string),
                task_count: dag.tasks().len(),
                latest_run,
            });
        }

        overviews
    }
}
