//! Test doubles for the domain layer.
//!
//! Enabled for this crate's own tests and, through the `mock` feature, for
//! downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::services::query::{QueryError, QueryRunner};

#[derive(Debug, Clone)]
enum Outcome {
    Rows(u64),
    Fail(String),
}

/// Query runner with canned answers keyed by query text.
///
/// Unknown queries succeed with zero rows. It also records every executed
/// query and the highest number of queries that were running at once.
#[derive(Debug, Default)]
pub struct ScriptedQueryRunner {
    outcomes: HashMap<String, Outcome>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    executed: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedQueryRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `rows` affected rows
    pub fn with_rows(mut self, query: impl Into<String>, rows: u64) -> Self {
        self.outcomes.insert(query.into(), Outcome::Rows(rows));
        self
    }

    /// Fail `query` with `message`
    pub fn with_failure(mut self, query: impl Into<String>, message: impl Into<String>) -> Self {
        self.outcomes.insert(query.into(), Outcome::Fail(message.into()));
        self
    }

    /// Delay every query by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Delay a single query, overriding the default delay
    pub fn with_query_delay(mut self, query: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(query.into(), delay);
        self
    }

    /// Queries in the order they started executing
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    /// Highest number of concurrently executing queries observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryRunner for ScriptedQueryRunner {
    async fn execute(&self, query: &str) -> Result<u64, QueryError> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(query.to_string());
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        let delay = self.delays.get(query).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.outcomes.get(query) {
            Some(Outcome::Rows(rows)) => Ok(*rows),
            Some(Outcome::Fail(message)) => Err(QueryError::Api(message.clone())),
            None => Ok(0),
        }
    }
}
