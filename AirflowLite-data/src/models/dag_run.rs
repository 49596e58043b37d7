use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root prefix under which every run is stored
pub const RUNS_PREFIX: &str = "dag_runs";

/// Overall status of a DAG run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Tasks are still being scheduled or executed
    Running,
    /// Every task succeeded
    Success,
    /// At least one task failed
    Failed,
}

impl RunStatus {
    /// Whether the run can no longer change state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status of a single task instance within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for upstream tasks
    Queued,
    /// Submitted to the worker pool, waiting for a free slot
    Pending,
    /// Query is executing
    Running,
    /// Query finished successfully
    Success,
    /// Query failed
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "QUEUED"),
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Execution record of one task inside a DAG run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: String,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Object key of the task log
    pub log_file_path: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Metadata document persisted for every DAG run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRunMetadata {
    pub dag_id: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub task_instances: Vec<TaskInstance>,
}

impl DagRunMetadata {
    /// Look up a task instance by task id
    pub fn task(&self, task_id: &str) -> Option<&TaskInstance> {
        self.task_instances.iter().find(|t| t.task_id == task_id)
    }

    /// Mutable lookup of a task instance by task id
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskInstance> {
        self.task_instances.iter_mut().find(|t| t.task_id == task_id)
    }

    /// Condensed view used for run listings
    pub fn summary(&self) -> DagRunSummary {
        DagRunSummary {
            run_id: self.run_id.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Condensed view of a run for history listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Prefix that holds every run of a DAG: `dag_runs/{dag_id}`
pub fn dag_prefix(dag_id: &str) -> String {
    format!("{}/{}", RUNS_PREFIX, dag_id)
}

/// Prefix of a single run: `dag_runs/{dag_id}/{run_id}`
pub fn run_prefix(dag_id: &str, run_id: &str) -> String {
    format!("{}/{}", dag_prefix(dag_id), run_id)
}

/// Key of the run metadata document
pub fn metadata_path(dag_id: &str, run_id: &str) -> String {
    format!("{}/metadata.json", run_prefix(dag_id, run_id))
}

/// Key of a task log
pub fn task_log_path(dag_id: &str, run_id: &str, task_id: &str) -> String {
    format!("{}/logs/{}.log", run_prefix(dag_id, run_id), task_id)
}
