//! Application configuration read from the environment.

use std::env;
use std::path::PathBuf;

use airflow_lite_data::storage::{StorageConfig, StorageError};
use thiserror::Error;
use tracing::info;

/// Port used when `PORT` is not set
pub const DEFAULT_PORT: u16 = 8080;
/// Upper bound of concurrently running tasks within one DAG run
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 4;
pub const DEFAULT_SERVICE_ACCOUNT_KEY_PATH: &str = "/etc/secrets/service_account.json";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// BigQuery settings
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Service account key; ambient credentials are used when the file is absent
    pub service_account_key_path: PathBuf,
    /// Project that runs the query jobs
    pub project_id: Option<String>,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            service_account_key_path: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_KEY_PATH),
            project_id: None,
        }
    }
}

/// Basic auth credentials of the single UI/API user
#[derive(Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "password".to_string(),
        }
    }
}

/// Top level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub bigquery: BigQueryConfig,
    pub max_parallel_tasks: usize,
    /// Optional JSON file with extra DAG definitions
    pub dags_file: Option<PathBuf>,
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            bigquery: BigQueryConfig::default(),
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            dags_file: None,
            environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the environment
    pub fn load() -> Result<Self, ConfigError> {
        if dotenv::dotenv().is_err() {
            info!(".env file not found, using process environment only");
        }
        Self::from_env()
    }

    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(value) => parse_number::<u16>("PORT", &value)?,
            None => defaults.port,
        };

        let max_parallel_tasks = match var("MAX_PARALLEL_TASKS") {
            Some(value) => {
                let n = parse_number::<usize>("MAX_PARALLEL_TASKS", &value)?;
                if n == 0 {
                    return Err(ConfigError::InvalidValue {
                        name: "MAX_PARALLEL_TASKS",
                        value,
                        reason: "must be at least 1".to_string(),
                    });
                }
                n
            }
            None => defaults.max_parallel_tasks,
        };

        let storage_type = match var("STORAGE_TYPE") {
            Some(value) => value.parse()?,
            None => defaults.storage.storage_type,
        };

        let storage = StorageConfig {
            storage_type,
            bucket_name: var("GCS_BUCKET_NAME").unwrap_or(defaults.storage.bucket_name),
            service_account_path: var("GCS_SERVICE_ACCOUNT_PATH"),
            data_dir: var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.data_dir),
        };

        let auth = AuthConfig {
            username: var("BASIC_AUTH_USERNAME").unwrap_or(defaults.auth.username),
            password: var("BASIC_AUTH_PASSWORD").unwrap_or(defaults.auth.password),
        };

        let bigquery = BigQueryConfig {
            service_account_key_path: var("BIGQUERY_SERVICE_ACCOUNT_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.bigquery.service_account_key_path),
            project_id: var("BIGQUERY_PROJECT_ID"),
        };

        Ok(Self {
            port,
            storage,
            auth,
            bigquery,
            max_parallel_tasks,
            dags_file: var("DAGS_FILE").map(PathBuf::from),
            environment: var("APP_ENV").unwrap_or(defaults.environment),
        })
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
