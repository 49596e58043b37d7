//! DAG run executor.
//!
//! A run is driven by one background tokio task that owns the run document.
//! Task queries execute on workers bounded by a semaphore; workers report
//! progress back over a channel and never touch the document themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use airflow_lite_data::models::dag_run::task_log_path;
use airflow_lite_data::models::{DagRunMetadata, RunStatus, TaskInstance, TaskStatus};
use airflow_lite_data::repository::{DagRunRepositoryTrait, RepositoryError};

use crate::entities::Dag;
use crate::services::query::QueryRunner;

/// Executor errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The run could not be recorded before it started
    #[error("Failed to persist initial run metadata: {0}")]
    Persistence(#[from] RepositoryError),
}

/// Progress reported by a worker to the run loop
#[derive(Debug)]
enum TaskEvent {
    Started {
        task_id: String,
        at: DateTime<Utc>,
    },
    Finished {
        task_id: String,
        at: DateTime<Utc>,
        outcome: Result<u64, String>,
    },
}

/// A started run and the handle of its background loop
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    /// Resolves to the final run document
    pub completion: JoinHandle<DagRunMetadata>,
}

/// Starts DAG runs and drives them to completion
#[derive(Clone)]
pub struct DagExecutor {
    repository: Arc<dyn DagRunRepositoryTrait>,
    runner: Arc<dyn QueryRunner>,
    max_parallel_tasks: usize,
}

impl DagExecutor {
    pub fn new(
        repository: Arc<dyn DagRunRepositoryTrait>,
        runner: Arc<dyn QueryRunner>,
        max_parallel_tasks: usize,
    ) -> Self {
        Self {
            repository,
            runner,
            max_parallel_tasks: max_parallel_tasks.max(1),
        }
    }

    pub fn max_parallel_tasks(&self) -> usize {
        self.max_parallel_tasks
    }

    /// Record a new run of `dag` and execute it in the background.
    /// Returns the run id once the initial metadata is stored.
    pub async fn start(&self, dag: Arc<Dag>) -> Result<String, ExecutorError> {
        self.spawn(dag).await.map(|handle| handle.run_id)
    }

    /// Like [`DagExecutor::start`], also handing back the loop's join handle
    #[instrument(skip(self, dag), fields(dag_id = %dag.dag_id()))]
    pub async fn spawn(&self, dag: Arc<Dag>) -> Result<RunHandle, ExecutorError> {
        let run_id = Uuid::new_v4().to_string();
        let metadata = initial_metadata(&dag, &run_id, Utc::now());

        self.repository.save_metadata(&metadata).await?;
        info!("Started DAG run {} for DAG {}", run_id, dag.dag_id());

        let run = RunLoop {
            dag,
            metadata,
            repository: self.repository.clone(),
            runner: self.runner.clone(),
            workers: Arc::new(Semaphore::new(self.max_parallel_tasks)),
        };

        Ok(RunHandle {
            run_id,
            completion: tokio::spawn(run.drive()),
        })
    }
}

/// Metadata of a freshly started run: RUNNING, every task QUEUED
pub fn initial_metadata(dag: &Dag, run_id: &str, now: DateTime<Utc>) -> DagRunMetadata {
    DagRunMetadata {
        dag_id: dag.dag_id().to_string(),
        run_id: run_id.to_string(),
        start_time: now,
        end_time: None,
        status: RunStatus::Running,
        task_instances: dag
            .tasks()
            .iter()
            .map(|task| TaskInstance {
                task_id: task.task_id.clone(),
                status: TaskStatus::Queued,
                start_time: None,
                end_time: None,
                log_file_path: task_log_path(dag.dag_id(), run_id, &task.task_id),
                depends_on: task.depends_on.clone(),
            })
            .collect(),
    }
}

fn task_log(task_id: &str, outcome: &Result<u64, String>) -> String {
    match outcome {
        Ok(rows) => format!(
            "Task {} completed successfully.\nRows affected/processed: {}",
            task_id, rows
        ),
        Err(err) => format!("Task {} failed.\nError: {}", task_id, err),
    }
}

struct RunLoop {
    dag: Arc<Dag>,
    metadata: DagRunMetadata,
    repository: Arc<dyn DagRunRepositoryTrait>,
    runner: Arc<dyn QueryRunner>,
    workers: Arc<Semaphore>,
}

impl RunLoop {
    async fn drive(mut self) -> DagRunMetadata {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut in_flight = 0usize;

        loop {
            if !self.has_failure() {
                let ready = self.ready_tasks();
                if !ready.is_empty() {
                    for task_id in &ready {
                        if let Some(task) = self.metadata.task_mut(task_id) {
                            task.status = TaskStatus::Pending;
                        }
                    }
                    self.persist().await;

                    for task_id in ready {
                        self.submit(task_id, events_tx.clone());
                        in_flight += 1;
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            // The loop keeps a sender alive, so `None` cannot happen
            let Some(event) = events.recv().await else {
                break;
            };
            if matches!(event, TaskEvent::Finished { .. }) {
                in_flight -= 1;
            }
            self.apply(event).await;
        }

        self.finish().await;
        self.metadata
    }

    fn has_failure(&self) -> bool {
        self.metadata
            .task_instances
            .iter()
            .any(|t| t.status == TaskStatus::Failed)
    }

    /// QUEUED tasks whose upstream tasks all succeeded, in declaration order
    fn ready_tasks(&self) -> Vec<String> {
        self.metadata
            .task_instances
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| {
                t.depends_on.iter().all(|dep| {
                    self.metadata
                        .task(dep)
                        .map_or(false, |d| d.status == TaskStatus::Success)
                })
            })
            .map(|t| t.task_id.clone())
            .collect()
    }

    fn submit(&self, task_id: String, events: mpsc::UnboundedSender<TaskEvent>) {
        let query = self
            .dag
            .get_task(&task_id)
            .map(|t| t.bigquery_query.clone())
            .unwrap_or_default();
        let runner = self.runner.clone();
        let workers = self.workers.clone();

        info!("Submitting task {}", task_id);
        tokio::spawn(async move {
            let outcome = match workers.acquire_owned().await {
                Ok(_permit) => {
                    let _ = events.send(TaskEvent::Started {
                        task_id: task_id.clone(),
                        at: Utc::now(),
                    });
                    // A panicking runner must still produce a Finished event
                    match tokio::spawn(async move { runner.execute(&query).await }).await {
                        Ok(Ok(rows)) => Ok(rows),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(e) => Err(format!("query worker aborted: {}", e)),
                    }
                }
                Err(_) => Err("worker pool closed".to_string()),
            };

            let _ = events.send(TaskEvent::Finished {
                task_id,
                at: Utc::now(),
                outcome,
            });
        });
    }

    async fn apply(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Started { task_id, at } => {
                if let Some(task) = self.metadata.task_mut(&task_id) {
                    task.status = TaskStatus::Running;
                    task.start_time = Some(at);
                }
                info!("Task {} is running", task_id);
                self.persist().await;
            }
            TaskEvent::Finished {
                task_id,
                at,
                outcome,
            } => {
                if let Some(task) = self.metadata.task_mut(&task_id) {
                    task.status = if outcome.is_ok() {
                        TaskStatus::Success
                    } else {
                        TaskStatus::Failed
                    };
                    task.end_time = Some(at);
                    // Pool closed before the task started
                    if task.start_time.is_none() {
                        task.start_time = Some(at);
                    }
                }

                match &outcome {
                    Ok(rows) => info!("Task {} completed successfully ({} rows)", task_id, rows),
                    Err(e) => error!("Task {} failed: {}", task_id, e),
                }

                self.persist().await;

                let log = task_log(&task_id, &outcome);
                if let Err(e) = self
                    .repository
                    .save_task_log(&self.metadata.dag_id, &self.metadata.run_id, &task_id, &log)
                    .await
                {
                    error!("Failed to upload log for task {}: {}", task_id, e);
                }
            }
        }
    }

    async fn finish(&mut self) {
        let all_succeeded = self
            .metadata
            .task_instances
            .iter()
            .all(|t| t.status == TaskStatus::Success);

        self.metadata.status = if all_succeeded {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.metadata.end_time = Some(Utc::now());

        let skipped = self
            .metadata
            .task_instances
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .count();
        if skipped > 0 {
            warn!(
                "{} task(s) of run {} were never scheduled after a failure",
                skipped, self.metadata.run_id
            );
        }

        info!(
            "DAG run {} for DAG {} finished with status {}",
            self.metadata.run_id, self.metadata.dag_id, self.metadata.status
        );
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.repository.save_metadata(&self.metadata).await {
            error!(
                "Failed to persist metadata of run {}: {}",
                self.metadata.run_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Task;
    use crate::services::query::{MockQueryRunner, QueryError};
    use crate::testing::ScriptedQueryRunner;
    use airflow_lite_data::repository::DagRunRepository;
    use airflow_lite_data::storage::SharedObjectStore;
    use async_trait::async_trait;
    use object_store::memory::InMemory;
    use std::time::Duration;

    fn repository() -> Arc<DagRunRepository> {
        let store: SharedObjectStore = Arc::new(InMemory::new());
        Arc::new(DagRunRepository::new(store))
    }

    fn fan_in() -> Arc<Dag> {
        Arc::new(
            Dag::new(
                "marketing_reports",
                None,
                vec![
                    Task::new("fetch_sales_data", "SELECT sales"),
                    Task::new("fetch_ad_campaign_data", "SELECT ads"),
                    Task::new("generate_summary_report", "SELECT summary")
                        .depends_on(["fetch_sales_data", "fetch_ad_campaign_data"]),
                ],
            )
            .unwrap(),
        )
    }

    fn status_of(run: &DagRunMetadata, task_id: &str) -> TaskStatus {
        run.task(task_id).unwrap().status
    }

    #[test]
    fn test_initial_metadata() {
        let dag = fan_in();
        let run = initial_metadata(&dag, "r1", Utc::now());

        assert_eq!(run.status, RunStatus::Running);
        assert!(run.end_time.is_none());
        assert_eq!(run.task_instances.len(), 3);
        assert!(run
            .task_instances
            .iter()
            .all(|t| t.status == TaskStatus::Queued && t.start_time.is_none()));
        assert_eq!(
            run.task("generate_summary_report").unwrap().log_file_path,
            "dag_runs/marketing_reports/r1/logs/generate_summary_report.log"
        );
    }

    #[tokio::test]
    async fn test_successful_run() {
        let repo = repository();
        let mut runner = MockQueryRunner::new();
        runner.expect_execute().times(3).returning(|query| match query {
            "SELECT sales" => Ok(10),
            "SELECT ads" => Ok(20),
            _ => Ok(1),
        });

        let executor = DagExecutor::new(repo.clone(), Arc::new(runner), 4);
        let handle = executor.spawn(fan_in()).await.unwrap();
        let run = handle.completion.await.unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert!(run.end_time.is_some());
        assert!(run
            .task_instances
            .iter()
            .all(|t| t.status == TaskStatus::Success && t.end_time.is_some()));

        let summary = run.task("generate_summary_report").unwrap();
        for upstream in ["fetch_sales_data", "fetch_ad_campaign_data"] {
            assert!(run.task(upstream).unwrap().end_time <= summary.start_time);
        }

        let stored = repo
            .get_metadata("marketing_reports", &handle.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, run);

        let log = repo
            .get_task_log("marketing_reports", &handle.run_id, "fetch_sales_data")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            log,
            "Task fetch_sales_data completed successfully.\nRows affected/processed: 10"
        );
    }

    #[tokio::test]
    async fn test_failure_stops_downstream_tasks() {
        let repo = repository();
        let runner = ScriptedQueryRunner::new().with_failure("SELECT sales", "Table not found");

        let executor = DagExecutor::new(repo.clone(), Arc::new(runner), 4);
        let handle = executor.spawn(fan_in()).await.unwrap();
        let run = handle.completion.await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(status_of(&run, "fetch_sales_data"), TaskStatus::Failed);
        assert_eq!(status_of(&run, "fetch_ad_campaign_data"), TaskStatus::Success);
        assert_eq!(status_of(&run, "generate_summary_report"), TaskStatus::Queued);
        assert!(run.task("generate_summary_report").unwrap().start_time.is_none());

        let log = repo
            .get_task_log("marketing_reports", &handle.run_id, "fetch_sales_data")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log, "Task fetch_sales_data failed.\nError: Table not found");
        assert!(repo
            .get_task_log("marketing_reports", &handle.run_id, "generate_summary_report")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_in_flight_tasks_drain_before_run_fails() {
        let repo = repository();
        let runner = ScriptedQueryRunner::new()
            .with_failure("SELECT sales", "boom")
            .with_query_delay("SELECT ads", Duration::from_millis(100));

        let executor = DagExecutor::new(repo, Arc::new(runner), 4);
        let run = executor
            .spawn(fan_in())
            .await
            .unwrap()
            .completion
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(status_of(&run, "fetch_ad_campaign_data"), TaskStatus::Success);
        let ads_end = run.task("fetch_ad_campaign_data").unwrap().end_time.unwrap();
        assert!(run.end_time.unwrap() >= ads_end);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let tasks = (0..6)
            .map(|i| Task::new(format!("t{}", i), format!("SELECT {}", i)))
            .collect();
        let dag = Arc::new(Dag::new("wide", None, tasks).unwrap());
        let runner = Arc::new(ScriptedQueryRunner::new().with_delay(Duration::from_millis(30)));

        let executor = DagExecutor::new(repository(), runner.clone(), 2);
        let run = executor.spawn(dag).await.unwrap().completion.await.unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(runner.executed().len(), 6);
        assert!(runner.peak_concurrency() <= 2);
        assert!(runner.peak_concurrency() >= 1);
    }

    #[tokio::test]
    async fn test_empty_dag_succeeds_immediately() {
        let repo = repository();
        let dag = Arc::new(Dag::new("noop", None, vec![]).unwrap());
        let executor = DagExecutor::new(repo.clone(), Arc::new(MockQueryRunner::new()), 4);

        let handle = executor.spawn(dag).await.unwrap();
        let run = handle.completion.await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_start_records_run_before_returning() {
        let repo = repository();
        let runner =
            ScriptedQueryRunner::new().with_delay(Duration::from_millis(200));
        let executor = DagExecutor::new(repo.clone(), Arc::new(runner), 4);

        let run_id = executor.start(fan_in()).await.unwrap();
        let stored = repo
            .get_metadata("marketing_reports", &run_id)
            .await
            .unwrap()
            .expect("run recorded");
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.end_time.is_none());
    }

    struct UnavailableRepository;

    #[async_trait]
    impl DagRunRepositoryTrait for UnavailableRepository {
        async fn save_metadata(&self, _: &DagRunMetadata) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage(object_store::Error::NotImplemented))
        }
        async fn get_metadata(&self, _: &str, _: &str) -> Result<Option<DagRunMetadata>, RepositoryError> {
            Ok(None)
        }
        async fn save_task_log(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage(object_store::Error::NotImplemented))
        }
        async fn get_task_log(&self, _: &str, _: &str, _: &str) -> Result<Option<String>, RepositoryError> {
            Ok(None)
        }
        async fn list_run_ids(&self, _: &str) -> Result<Vec<String>, RepositoryError> {
            Ok(vec![])
        }
        async fn ping(&self) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initial_persistence_failure_is_returned() {
        let executor = DagExecutor::new(
            Arc::new(UnavailableRepository),
            Arc::new(MockQueryRunner::new()),
            4,
        );
        assert!(matches!(
            executor.start(fan_in()).await,
            Err(ExecutorError::Persistence(_))
        ));
    }

    #[test]
    fn test_log_formats() {
        assert_eq!(
            task_log("extract", &Ok(3)),
            "Task extract completed successfully.\nRows affected/processed: 3"
        );
        let err = QueryError::Api("quota exceeded".to_string()).to_string();
        assert_eq!(
            task_log("extract", &Err(err)),
            "Task extract failed.\nError: quota exceeded"
        );
    }
}
