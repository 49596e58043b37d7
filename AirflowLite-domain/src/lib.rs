// AirflowLite Domain
// DAG model, registry, executor, query runners and authentication

// Configuration read from the environment
pub mod config;

// Services that implement business logic
pub mod services;

// Authentication
pub mod auth;

// Domain entities
pub mod entities;

// Known DAGs
pub mod registry;

// Health checks and system status
pub mod health;

// Re-export the run models for convenience
pub use airflow_lite_data::models;

// Test doubles - available to this crate's tests and with the mock feature
#[cfg(any(test, feature = "mock"))]
pub mod testing;
