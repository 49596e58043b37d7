// AirflowLite-api lib.rs
//
// HTTP surface of AirflowLite: router, handlers, HTML views and OpenAPI docs.

pub mod api;
pub mod entities;
pub mod openapi;
pub mod views;

pub use api::{create_app, AppState};
