//! Registry of the DAGs this deployment knows about.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::entities::dag::{Dag, DagDefinition, DagError, Task};

/// Errors raised while loading DAG definitions
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read DAG definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse DAG definitions from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("DAG '{0}' is defined more than once in the same file")]
    DuplicateDag(String),

    #[error(transparent)]
    InvalidDag(#[from] DagError),
}

/// Layout of a definitions file
#[derive(Debug, Deserialize)]
struct DefinitionsFile {
    dags: Vec<DagDefinition>,
}

/// Ordered collection of DAGs, keyed by `dag_id`
#[derive(Debug, Clone, Default)]
pub struct DagRegistry {
    dags: IndexMap<String, Arc<Dag>>,
}

impl DagRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the DAGs that ship with the service
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for dag in builtin_dags() {
            registry.register(dag);
        }
        registry
    }

    /// Add a DAG, replacing any DAG with the same id
    pub fn register(&mut self, dag: Dag) {
        if self.dags.contains_key(dag.dag_id()) {
            warn!("Replacing existing definition of DAG {}", dag.dag_id());
        }
        self.dags.insert(dag.dag_id().to_string(), Arc::new(dag));
    }

    /// Parse definitions from a JSON document and register every DAG in it.
    /// Nothing is registered if any definition is invalid.
    pub fn load_str(&mut self, source: &str, origin: &str) -> Result<usize, RegistryError> {
        let file: DefinitionsFile =
            serde_json::from_str(source).map_err(|source| RegistryError::Parse {
                path: origin.to_string(),
                source,
            })?;

        let mut parsed: IndexMap<String, Dag> = IndexMap::new();
        for definition in file.dags {
            let dag = Dag::try_from(definition)?;
            if parsed.contains_key(dag.dag_id()) {
                return Err(RegistryError::DuplicateDag(dag.dag_id().to_string()));
            }
            parsed.insert(dag.dag_id().to_string(), dag);
        }

        let count = parsed.len();
        for (_, dag) in parsed {
            self.register(dag);
        }
        Ok(count)
    }

    /// Load definitions from a JSON file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, RegistryError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: origin.clone(),
            source,
        })?;

        let count = self.load_str(&source, &origin)?;
        info!("Loaded {} DAG definition(s) from {}", count, origin);
        Ok(count)
    }

    pub fn get(&self, dag_id: &str) -> Option<Arc<Dag>> {
        self.dags.get(dag_id).cloned()
    }

    /// Registered ids in registration order
    pub fn dag_ids(&self) -> Vec<String> {
        self.dags.keys().cloned().collect()
    }

    pub fn dags(&self) -> Vec<Arc<Dag>> {
        self.dags.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.dags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dags.is_empty()
    }
}

/// DAGs compiled into the binary
fn builtin_dags() -> Vec<Dag> {
    let etl_pipeline_test = Dag::new(
        "etl_pipeline_test",
        None,
        vec![Task::new(
            "extract_data",
            "SELECT count(*) FROM `bigquery-public-data.stackoverflow.posts_questions` WHERE creation_date > '2023-01-01'",
        )],
    );

    match etl_pipeline_test {
        Ok(dag) => vec![dag],
        Err(e) => {
            // Static definitions; only reachable if someone edits them badly
            tracing::error!("Built-in DAG is invalid: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKETING: &str = r#"{
        "dags": [
            {
                "dag_id": "marketing_reports",
                "tasks": [
                    { "task_id": "fetch_sales_data", "bigquery_query": "SELECT 1" },
                    { "task_id": "fetch_ad_campaign_data", "bigquery_query": "SELECT 2" },
                    {
                        "task_id": "generate_summary_report",
                        "bigquery_query": "SELECT 3",
                        "depends_on": ["fetch_sales_data", "fetch_ad_campaign_data"]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_builtin_registry() {
        let registry = DagRegistry::builtin();
        assert_eq!(registry.dag_ids(), vec!["etl_pipeline_test".to_string()]);

        let dag = registry.get("etl_pipeline_test").unwrap();
        assert_eq!(dag.tasks()[0].task_id, "extract_data");
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_load_definitions_keeps_order() {
        let mut registry = DagRegistry::builtin();
        let count = registry.load_str(MARKETING, "inline").unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            registry.dag_ids(),
            vec!["etl_pipeline_test".to_string(), "marketing_reports".to_string()]
        );
    }

    #[test]
    fn test_invalid_definitions_register_nothing() {
        let source = r#"{
            "dags": [
                { "dag_id": "ok", "tasks": [] },
                { "dag_id": "broken", "tasks": [
                    { "task_id": "b", "bigquery_query": "SELECT 1", "depends_on": ["a"] }
                ] }
            ]
        }"#;

        let mut registry = DagRegistry::new();
        let err = registry.load_str(source, "inline").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDag(DagError::UnknownDependency { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_dag_in_file() {
        let source = r#"{ "dags": [ { "dag_id": "a" }, { "dag_id": "a" } ] }"#;
        let err = DagRegistry::new().load_str(source, "inline").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateDag(id) if id == "a"));
    }

    #[test]
    fn test_missing_file() {
        let err = DagRegistry::new()
            .load_file("/definitely/not/here.json")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
    }

    #[test]
    fn test_shipped_example_file_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../dags/example.json");
        let mut registry = DagRegistry::new();
        registry.load_file(path).unwrap();
        assert!(registry.get("marketing_reports").is_some());
    }
}
