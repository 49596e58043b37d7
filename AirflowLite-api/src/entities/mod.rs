// Public entities for the AirflowLite API
// Data structures returned across the HTTP boundary

// DAG, run and task representations
pub mod dags;

// Common entities for error handling
pub mod common;
