pub mod bigquery;
pub mod executor;
pub mod query;
pub mod runs;

// Domain services
// Execution of DAG runs and the queries on top of stored runs.

pub use bigquery::BigQueryRunner;
pub use executor::{DagExecutor, ExecutorError, RunHandle};
pub use query::{QueryError, QueryRunner};
pub use runs::{DagOverview, DagRunService, DagRunServiceError, DagRunServiceTrait};
