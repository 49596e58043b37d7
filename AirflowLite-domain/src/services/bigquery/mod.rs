//! BigQuery implementation of [`QueryRunner`] over the v2 REST API.

pub mod credentials;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use crate::config::BigQueryConfig;
use crate::services::query::{QueryError, QueryRunner};
pub use credentials::GoogleCredentials;

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
/// Server side wait per request before the API answers `jobComplete: false`
const WAIT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorProto {
    message: String,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    /// int64 values are encoded as strings by the API
    total_rows: Option<String>,
    num_dml_affected_rows: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

impl QueryResponse {
    fn affected_rows(&self) -> Result<u64, QueryError> {
        if let Some(first) = self.errors.first() {
            return Err(QueryError::Api(first.message.clone()));
        }

        match self.num_dml_affected_rows.as_ref().or(self.total_rows.as_ref()) {
            Some(rows) => rows
                .parse::<u64>()
                .map_err(|_| QueryError::InvalidResponse(format!("row count {:?}", rows))),
            None => Ok(0),
        }
    }
}

/// Runs task queries as BigQuery jobs
#[derive(Debug)]
pub struct BigQueryRunner {
    http: reqwest::Client,
    credentials: Arc<GoogleCredentials>,
    configured_project: Option<String>,
    project: OnceCell<String>,
    base_url: String,
    poll_interval: Duration,
}

impl BigQueryRunner {
    /// Build a runner from configuration, discovering credentials
    pub fn from_config(config: &BigQueryConfig) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let credentials = GoogleCredentials::discover(&config.service_account_key_path, http.clone())?;
        Ok(Self::new(http, Arc::new(credentials), config.project_id.clone()))
    }

    pub fn new(
        http: reqwest::Client,
        credentials: Arc<GoogleCredentials>,
        project_id: Option<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            configured_project: project_id,
            project: OnceCell::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Point the runner at another endpoint (emulators, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Project used for query jobs: explicit setting, then key file, then
    /// metadata server
    async fn project(&self) -> Result<&str, QueryError> {
        let project = self
            .project
            .get_or_try_init(|| async {
                if let Some(project) = &self.configured_project {
                    return Ok(project.clone());
                }
                if let Some(project) = self.credentials.key_project_id() {
                    return Ok(project.to_string());
                }
                self.credentials.metadata_project_id().await
            })
            .await?;
        Ok(project.as_str())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse, QueryError> {
        let response = request.send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("no error message")
                .to_string();
            return Err(QueryError::Api(format!("BigQuery returned {}: {}", status, message)));
        }

        serde_json::from_value(body).map_err(|e| QueryError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl QueryRunner for BigQueryRunner {
    #[instrument(skip(self))]
    async fn execute(&self, query: &str) -> Result<u64, QueryError> {
        let project = self.project().await?;
        info!("Executing BigQuery query in project {}", project);

        let token = self.credentials.access_token().await?;
        let request = self
            .http
            .post(format!("{}/projects/{}/queries", self.base_url, project))
            .bearer_auth(token)
            .json(&json!({
                "query": query,
                "useLegacySql": false,
                "timeoutMs": WAIT_TIMEOUT_MS,
            }));

        let mut response = self.send(request).await?;

        while !response.job_complete {
            let job = response.job_reference.clone().ok_or_else(|| {
                QueryError::InvalidResponse("incomplete job without jobReference".to_string())
            })?;
            debug!("Job {} still running, polling", job.job_id);
            tokio::time::sleep(self.poll_interval).await;

            let token = self.credentials.access_token().await?;
            let mut request = self
                .http
                .get(format!(
                    "{}/projects/{}/queries/{}",
                    self.base_url, job.project_id, job.job_id
                ))
                .bearer_auth(token)
                .query(&[("timeoutMs", WAIT_TIMEOUT_MS.to_string())]);
            if let Some(location) = &job.location {
                request = request.query(&[("location", location)]);
            }

            response = self.send(request).await?;
        }

        match response.affected_rows() {
            Ok(rows) => {
                info!("BigQuery query completed. Rows affected/processed: {}", rows);
                Ok(rows)
            }
            Err(e) => {
                error!("Error executing BigQuery query: {}", e);
                Err(e)
            }
        }
    }
}
