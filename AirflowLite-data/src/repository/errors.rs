use thiserror::Error;

/// Error type for repository operations
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Object store error
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),

    /// Metadata could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored document exists but cannot be decoded
    #[error("Corrupted object at {path}: {reason}")]
    Corrupted { path: String, reason: String },

    /// Task log is not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidText(String),
}
