use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Errors raised while building a DAG definition
#[derive(Debug, Error, PartialEq)]
pub enum DagError {
    /// Field level validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Two tasks share an id
    #[error("Duplicate task '{task}' in DAG '{dag}'")]
    DuplicateTask { dag: String, task: String },

    /// A dependency points outside the DAG
    #[error("Task '{task}' depends on non-existent task '{dependency}' in DAG '{dag}'")]
    UnknownDependency {
        dag: String,
        task: String,
        dependency: String,
    },

    /// The dependency graph is not acyclic
    #[error("DAG '{dag}' contains a dependency cycle through: {}", tasks.join(", "))]
    Cycle { dag: String, tasks: Vec<String> },
}

/// A single unit of work: one BigQuery statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Task {
    #[validate(length(min = 1, message = "task_id must not be empty"))]
    pub task_id: String,

    #[validate(length(min = 1, message = "bigquery_query must not be empty"))]
    pub bigquery_query: String,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, bigquery_query: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            bigquery_query: bigquery_query.into(),
            depends_on: Vec::new(),
        }
    }

    /// Builder style helper to declare upstream tasks
    pub fn depends_on<I, S>(mut self, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = upstream.into_iter().map(Into::into).collect();
        self
    }
}

/// Raw DAG definition as found in a definitions file
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DagDefinition {
    #[validate(length(min = 1, message = "dag_id must not be empty"))]
    pub dag_id: String,

    #[serde(default)]
    pub schedule_interval: Option<String>,

    #[validate]
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A validated directed acyclic graph of tasks
#[derive(Debug, Clone, Serialize)]
pub struct Dag {
    dag_id: String,
    /// Stored for display only, nothing schedules on it
    schedule_interval: Option<String>,
    tasks: Vec<Task>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Dag {
    /// Build and validate a DAG
    pub fn new(
        dag_id: impl Into<String>,
        schedule_interval: Option<String>,
        tasks: Vec<Task>,
    ) -> Result<Self, DagError> {
        DagDefinition {
            dag_id: dag_id.into(),
            schedule_interval,
            tasks,
        }
        .try_into()
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    pub fn schedule_interval(&self) -> Option<&str> {
        self.schedule_interval.as_deref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    /// Task ids ordered so that every task comes after its dependencies.
    /// Ties keep declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        // Construction guarantees the graph is acyclic
        kahn_order(&self.tasks).unwrap_or_default()
    }
}

impl TryFrom<DagDefinition> for Dag {
    type Error = DagError;

    fn try_from(definition: DagDefinition) -> Result<Self, Self::Error> {
        if let Err(errors) = definition.validate() {
            return Err(DagError::Validation(format!(
                "DAG '{}': {}",
                definition.dag_id, errors
            )));
        }

        let DagDefinition {
            dag_id,
            schedule_interval,
            tasks,
        } = definition;

        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.task_id.clone(), i).is_some() {
                return Err(DagError::DuplicateTask {
                    dag: dag_id,
                    task: task.task_id.clone(),
                });
            }
        }

        for task in &tasks {
            for dep in &task.depends_on {
                if !index.contains_key(dep) {
                    return Err(DagError::UnknownDependency {
                        dag: dag_id,
                        task: task.task_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if let Err(cyclic) = kahn_order(&tasks) {
            return Err(DagError::Cycle {
                dag: dag_id,
                tasks: cyclic,
            });
        }

        Ok(Self {
            dag_id,
            schedule_interval,
            tasks,
            index,
        })
    }
}

/// Kahn's algorithm over the declared tasks. On a cycle, returns the ids
/// that could not be ordered.
fn kahn_order(tasks: &[Task]) -> Result<Vec<&str>, Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .map(|t| (t.task_id.as_str(), t.depends_on.len()))
        .collect();

    let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        for dep in &task.depends_on {
            downstream
                .entry(dep.as_str())
                .or_default()
                .push(task.task_id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = tasks
        .iter()
        .filter(|t| t.depends_on.is_empty())
        .map(|t| t.task_id.as_str())
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(task_id) = ready.pop_front() {
        order.push(task_id);
        for child in downstream.get(task_id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(*child);
                }
            }
        }
    }

    if order.len() == tasks.len() {
        Ok(order)
    } else {
        let ordered: HashSet<&str> = order.into_iter().collect();
        Err(tasks
            .iter()
            .filter(|t| !ordered.contains(t.task_id.as_str()))
            .map(|t| t.task_id.clone())
            .collect())
    }
}
