use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::errors::RepositoryError;
use crate::models::dag_run::{self, DagRunMetadata};
use crate::storage::SharedObjectStore;

/// Repository trait for DAG run metadata and task logs
#[async_trait]
pub trait DagRunRepositoryTrait: Send + Sync {
    /// Write (or overwrite) the metadata document of a run
    async fn save_metadata(&self, metadata: &DagRunMetadata) -> Result<(), RepositoryError>;

    /// Read the metadata document of a run, `None` if the run does not exist
    async fn get_metadata(&self, dag_id: &str, run_id: &str) -> Result<Option<DagRunMetadata>, RepositoryError>;

    /// Write the log of a task
    async fn save_task_log(&self, dag_id: &str, run_id: &str, task_id: &str, content: &str) -> Result<(), RepositoryError>;

    /// Read the log of a task, `None` if it was never written
    async fn get_task_log(&self, dag_id: &str, run_id: &str, task_id: &str) -> Result<Option<String>, RepositoryError>;

    /// List the ids of every stored run of a DAG
    async fn list_run_ids(&self, dag_id: &str) -> Result<Vec<String>, RepositoryError>;

    /// Check that the backing store answers
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Repository for DAG runs backed by any `object_store` implementation
#[derive(Debug, Clone)]
pub struct DagRunRepository {
    store: SharedObjectStore,
}

impl DagRunRepository {
    /// Create a new repository over `store`
    pub fn new(store: SharedObjectStore) -> Self {
        Self { store }
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        let path = Path::from(key);
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => {
                warn!("Object {} does not exist", key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), RepositoryError> {
        self.store.put(&Path::from(key), PutPayload::from(bytes)).await?;
        Ok(())
    }
}

/// Serialize with a four space indent, matching the documents written by
/// earlier deployments
fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

#[async_trait]
impl DagRunRepositoryTrait for DagRunRepository {
    async fn save_metadata(&self, metadata: &DagRunMetadata) -> Result<(), RepositoryError> {
        let key = dag_run::metadata_path(&metadata.dag_id, &metadata.run_id);
        let bytes = to_pretty_json(metadata)?;
        self.write(&key, bytes).await?;
        debug!("Uploaded run metadata to {}", key);
        Ok(())
    }

    async fn get_metadata(&self, dag_id: &str, run_id: &str) -> Result<Option<DagRunMetadata>, RepositoryError> {
        let key = dag_run::metadata_path(dag_id, run_id);
        let Some(bytes) = self.read(&key).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RepositoryError::Corrupted {
                path: key,
                reason: e.to_string(),
            })
    }

    async fn save_task_log(&self, dag_id: &str, run_id: &str, task_id: &str, content: &str) -> Result<(), RepositoryError> {
        let key = dag_run::task_log_path(dag_id, run_id, task_id);
        self.write(&key, content.as_bytes().to_vec()).await?;
        info!("Uploaded task log to {}", key);
        Ok(())
    }

    async fn get_task_log(&self, dag_id: &str, run_id: &str, task_id: &str) -> Result<Option<String>, RepositoryError> {
        let key = dag_run::task_log_path(dag_id, run_id, task_id);
        match self.read(&key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| RepositoryError::InvalidText(key)),
            None => Ok(None),
        }
    }

    async fn list_run_ids(&self, dag_id: &str) -> Result<Vec<String>, RepositoryError> {
        let prefix = Path::from(dag_run::dag_prefix(dag_id));
        let listing = self.store.list_with_delimiter(Some(&prefix)).await?;

        let mut run_ids: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        run_ids.sort();
        Ok(run_ids)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        let prefix = Path::from(dag_run::RUNS_PREFIX);
        // A single page is enough to prove connectivity
        let _ = self.store.list(Some(&prefix)).try_next().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dag_run::{RunStatus, TaskInstance, TaskStatus};
    use chrono::Utc;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn repository() -> (DagRunRepository, SharedObjectStore) {
        let store: SharedObjectStore = Arc::new(InMemory::new());
        (DagRunRepository::new(store.clone()), store)
    }

    fn metadata(dag_id: &str, run_id: &str) -> DagRunMetadata {
        DagRunMetadata {
            dag_id: dag_id.to_string(),
            run_id: run_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            task_instances: vec![TaskInstance {
                task_id: "extract".to_string(),
                status: TaskStatus::Queued,
                start_time: None,
                end_time: None,
                log_file_path: dag_run::task_log_path(dag_id, run_id, "extract"),
                depends_on: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn test_metadata_is_stored_and_overwritten() {
        let (repo, _) = repository();
        let mut run = metadata("etl", "run-1");
        repo.save_metadata(&run).await.unwrap();

        run.status = RunStatus::Success;
        run.end_time = Some(Utc::now());
        repo.save_metadata(&run).await.unwrap();

        let stored = repo.get_metadata("etl", "run-1").await.unwrap().unwrap();
        assert_eq!(stored, run);
    }

    #[tokio::test]
    async fn test_missing_objects_are_none() {
        let (repo, _) = repository();
        assert!(repo.get_metadata("etl", "nope").await.unwrap().is_none());
        assert!(repo.get_task_log("etl", "nope", "extract").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_uses_four_space_indent() {
        let (repo, store) = repository();
        repo.save_metadata(&metadata("etl", "run-1")).await.unwrap();

        let raw = store
            .get(&Path::from("dag_runs/etl/run-1/metadata.json"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let text = String::from_utf8(raw.to_vec()).unwrap();
        assert!(text.contains("\n    \"dag_id\": \"etl\""));
    }

    #[tokio::test]
    async fn test_corrupted_metadata_is_reported() {
        let (repo, store) = repository();
        store
            .put(&Path::from("dag_runs/etl/bad/metadata.json"), PutPayload::from("{not json"))
            .await
            .unwrap();

        let err = repo.get_metadata("etl", "bad").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_task_log_round_trip() {
        let (repo, _) = repository();
        repo.save_task_log("etl", "run-1", "extract", "Task extract completed successfully.")
            .await
            .unwrap();

        let log = repo.get_task_log("etl", "run-1", "extract").await.unwrap();
        assert_eq!(log.as_deref(), Some("Task extract completed successfully."));
    }

    #[tokio::test]
    async fn test_list_run_ids_only_returns_runs_of_the_dag() {
        let (repo, _) = repository();
        repo.save_metadata(&metadata("etl", "b")).await.unwrap();
        repo.save_metadata(&metadata("etl", "a")).await.unwrap();
        repo.save_task_log("etl", "a", "extract", "log").await.unwrap();
        repo.save_metadata(&metadata("etl_other", "c")).await.unwrap();

        let ids = repo.list_run_ids("etl").await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_ping_on_empty_store() {
        let (repo, _) = repository();
        repo.ping().await.unwrap();
    }
}
