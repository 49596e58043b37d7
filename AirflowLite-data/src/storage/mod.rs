// Storage modules
pub mod connection;

// Re-export storage connection types
pub use connection::*;
