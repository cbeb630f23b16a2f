//! Error types for the conveyor job engine.

use thiserror::Error;

/// Result type alias using conveyor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for conveyor operations.
///
/// `UnknownJobType` and `JobNotFound` are the two structural errors that
/// propagate synchronously to submission-API callers. Handler failures and
/// timeouts never appear here; they are routed through the retry controller
/// and surface only as job state.
#[derive(Error, Debug)]
pub enum Error {
    /// Submission referenced a job type with no registered handler
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// Status/cancel referenced an unknown job id
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Durable store operation failed (non-database backends)
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
