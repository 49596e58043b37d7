//! Object store connection module for AirflowLite
//!
//! Run metadata and task logs live in an object store. Supported backends:
//! - Google Cloud Storage (default)
//! - Local filesystem
//! - In-memory (development and tests)

use std::path::PathBuf;
use std::sync::Arc;

use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ClientOptions, ObjectStore};
use thiserror::Error;
use tracing::{info, warn};

/// Default bucket when `GCS_BUCKET_NAME` is not set
pub const DEFAULT_BUCKET_NAME: &str = "your-airflow-lite-bucket";

/// Shared handle to the configured object store
pub type SharedObjectStore = Arc<dyn ObjectStore>;

/// Storage error
#[derive(Error, Debug)]
pub enum StorageError {
    /// Unsupported storage type
    #[error("Unsupported storage type: {0}")]
    UnsupportedStorageType(String),

    /// The local data directory could not be prepared
    #[error("Failed to prepare data directory {path}: {source}")]
    DataDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The object store client could not be built
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Supported storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Google Cloud Storage bucket
    Gcs,
    /// Directory on the local filesystem
    Local,
    /// Process-local memory
    Memory,
}

impl std::str::FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gcs" | "gcp" => Ok(StorageType::Gcs),
            "local" | "file" => Ok(StorageType::Local),
            "memory" | "in-memory" => Ok(StorageType::Memory),
            _ => Err(StorageError::UnsupportedStorageType(s.to_string())),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend to use
    pub storage_type: StorageType,
    /// GCS bucket holding run data
    pub bucket_name: String,
    /// Optional service account key for GCS; ambient credentials otherwise
    pub service_account_path: Option<String>,
    /// Root directory for the local backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Gcs,
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            service_account_path: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    /// In-memory configuration, used by tests and local experiments
    pub fn memory() -> Self {
        Self {
            storage_type: StorageType::Memory,
            ..Self::default()
        }
    }

    /// Human readable location, used in logs and health details
    pub fn describe(&self) -> String {
        match self.storage_type {
            StorageType::Gcs => format!("gs://{}", self.bucket_name),
            StorageType::Local => format!("file://{}", self.data_dir.display()),
            StorageType::Memory => "memory://".to_string(),
        }
    }
}

/// Build the object store described by `config`
pub fn connect(config: &StorageConfig) -> Result<SharedObjectStore, StorageError> {
    info!("Initializing object store at {}", config.describe());

    let store: SharedObjectStore = match config.storage_type {
        StorageType::Gcs => {
            let client_options = ClientOptions::new()
                .with_content_type_for_suffix("json", "application/json")
                .with_content_type_for_suffix("log", "text/plain");

            let mut builder = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(&config.bucket_name)
                .with_client_options(client_options);

            match &config.service_account_path {
                Some(path) => {
                    info!("Using GCS service account key from {}", path);
                    builder = builder.with_service_account_path(path);
                }
                None => {
                    warn!("GCS_SERVICE_ACCOUNT_PATH not set. Using ambient Google credentials.");
                }
            }

            Arc::new(builder.build()?)
        }
        StorageType::Local => {
            if !config.data_dir.exists() {
                info!("Creating data directory: {}", config.data_dir.display());
                std::fs::create_dir_all(&config.data_dir).map_err(|source| {
                    StorageError::DataDirectory {
                        path: config.data_dir.display().to_string(),
                        source,
                    }
                })?;
            }
            Arc::new(LocalFileSystem::new_with_prefix(&config.data_dir)?)
        }
        StorageType::Memory => {
            warn!("Using in-memory storage. Run history is lost on restart.");
            Arc::new(InMemory::new())
        }
    };

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_parsing() {
        assert_eq!("GCS".parse::<StorageType>().unwrap(), StorageType::Gcs);
        assert_eq!("local".parse::<StorageType>().unwrap(), StorageType::Local);
        assert_eq!("memory".parse::<StorageType>().unwrap(), StorageType::Memory);
        assert!(matches!(
            "s3".parse::<StorageType>(),
            Err(StorageError::UnsupportedStorageType(t)) if t == "s3"
        ));
    }

    #[test]
    fn test_describe() {
        assert_eq!(StorageConfig::default().describe(), "gs://your-airflow-lite-bucket");
        assert_eq!(StorageConfig::memory().describe(), "memory://");
    }

    #[test]
    fn test_connect_local_creates_directory() {
        let dir = std::env::temp_dir().join(format!("airflow-lite-{}", std::process::id()));
        let config = StorageConfig {
            storage_type: StorageType::Local,
            data_dir: dir.clone(),
            ..StorageConfig::default()
        };

        connect(&config).unwrap();
        assert!(dir.exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
