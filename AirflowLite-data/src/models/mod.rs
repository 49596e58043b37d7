pub mod dag_run;

pub use dag_run::{DagRunMetadata, DagRunSummary, RunStatus, TaskInstance, TaskStatus};
