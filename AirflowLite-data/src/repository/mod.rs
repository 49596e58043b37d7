// Repository module structure
pub mod errors;
mod dag_run;

// Re-export commonly used types
pub use errors::RepositoryError;
pub use dag_run::{DagRunRepository, DagRunRepositoryTrait};
