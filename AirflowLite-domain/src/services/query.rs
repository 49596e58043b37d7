use async_trait::async_trait;
use thiserror::Error;

/// Errors produced while executing a task query
#[derive(Debug, Error)]
pub enum QueryError {
    /// Credentials could not be obtained
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The query service rejected the query or the job failed
    #[error("{0}")]
    Api(String),

    /// Transport level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected response shape
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

/// Executes the statement of a task.
///
/// Returns the number of rows affected by a DML statement, or the number of
/// rows in the result otherwise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn execute(&self, query: &str) -> Result<u64, QueryError>;
}
