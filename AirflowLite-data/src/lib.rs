// AirflowLite Data
// This crate handles persistence of DAG run metadata and task logs

// Object store connection management
pub mod storage;

// Repository implementations for data access
pub mod repository;

// Data storage models
pub mod models;
