//! Error types for the vidsrc crate

use thiserror::Error;

/// Result type for vidsrc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vidsrc operations
#[derive(Debug, Error)]
pub enum Error {
    /// Login failed or the remote platform rejected the session
    #[error("Authentication failure: {0}")]
    Authentication(String),

    /// Network failure that survived the in-run retries
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// A remote record could not be normalized
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Unique-constraint race during merge
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid configuration, options, or cursor state
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the orchestrator should retry the channel run that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_)
                | Error::TransientNetwork(_)
                | Error::StorageConflict(_)
                | Error::Database(_)
        )
    }
}
