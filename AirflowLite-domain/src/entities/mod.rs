// Domain entities and value objects
pub mod dag;

// Re-export common types for easier imports
pub use dag::{Dag, DagDefinition, DagError, Task};
