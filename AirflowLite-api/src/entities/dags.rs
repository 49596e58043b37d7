use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use airflow_lite_data::models::{DagRunMetadata, DagRunSummary, TaskInstance};
use airflow_lite_domain::entities::{Dag, Task};
use airflow_lite_domain::services::DagOverview;

/// Public representation of a task definition
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskResponse {
    pub task_id: String,

    /// BigQuery Standard SQL statement
    pub bigquery_query: String,

    /// Upstream task ids
    pub depends_on: Vec<String>,
}

/// Condensed view of a DAG run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunSummaryResponse {
    pub run_id: String,

    /// RUNNING, SUCCESS or FAILED
    #[schema(example = "SUCCESS")]
    pub status: String,

    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// A DAG with its latest run, as shown on the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DagOverviewResponse {
    pub dag_id: String,

    /// Informational only, runs are triggered manually
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_interval: Option<String>,

    pub task_count: usize,

    /// Most recent run, absent when the DAG never ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_run: Option<RunSummaryResponse>,
}

/// A DAG definition and its run history, newest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DagDetailResponse {
    pub dag_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_interval: Option<String>,

    pub tasks: Vec<TaskResponse>,

    pub runs: Vec<RunSummaryResponse>,
}

/// Execution record of one task
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskInstanceResponse {
    pub task_id: String,

    /// QUEUED, PENDING, RUNNING, SUCCESS or FAILED
    #[schema(example = "RUNNING")]
    pub status: String,

    pub start_time: Option<DateTime<Utc>>,

    pub end_time: Option<DateTime<Utc>>,

    /// Object key of the task log
    pub log_file_path: String,

    pub depends_on: Vec<String>,
}

/// Full metadata of a DAG run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DagRunResponse {
    pub dag_id: String,
    pub run_id: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub task_instances: Vec<TaskInstanceResponse>,
}

/// Result of a trigger request made by an API client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerResponse {
    pub dag_id: String,
    pub run_id: String,
    /// Absolute URL of the run detail page
    pub run_url: String,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            bigquery_query: task.bigquery_query.clone(),
            depends_on: task.depends_on.clone(),
        }
    }
}

impl From<DagRunSummary> for RunSummaryResponse {
    fn from(summary: DagRunSummary) -> Self {
        Self {
            run_id: summary.run_id,
            status: summary.status.to_string(),
            start_time: summary.start_time,
            end_time: summary.end_time,
        }
    }
}

impl From<DagOverview> for DagOverviewResponse {
    fn from(overview: DagOverview) -> Self {
        Self {
            dag_id: overview.dag_id,
            schedule_interval: overview.schedule_interval,
            task_count: overview.task_count,
            latest_run: overview.latest_run.map(Into::into),
        }
    }
}

impl DagDetailResponse {
    pub fn new(dag: &Dag, runs: Vec<DagRunSummary>) -> Self {
        Self {
            dag_id: dag.dag_id().to_string(),
            schedule_interval: dag.schedule_interval().map(str::to_string),
            tasks: dag.tasks().iter().map(TaskResponse::from).collect(),
            runs: runs.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<TaskInstance> for TaskInstanceResponse {
    fn from(task: TaskInstance) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status.to_string(),
            start_time: task.start_time,
            end_time: task.end_time,
            log_file_path: task.log_file_path,
            depends_on: task.depends_on,
        }
    }
}

impl From<DagRunMetadata> for DagRunResponse {
    fn from(run: DagRunMetadata) -> Self {
        Self {
            dag_id: run.dag_id,
            run_id: run.run_id,
            status: run.status.to_string(),
            start_time: run.start_time,
            end_time: run.end_time,
            task_instances: run.task_instances.into_iter().map(Into::into).collect(),
        }
    }
}
