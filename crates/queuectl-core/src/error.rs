//! Error types for the queuectl core crate.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for queuectl.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed enqueue input (missing command, bad timestamp).
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    /// `dlq_retry` on a job that does not exist or is not dead.
    #[error("not found or not dead")]
    NotDead,

    /// Database errors (sqlx wrapped).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON encoding/decoding errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors (pid file, process spawning).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with description.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new `InvalidSpec` error.
    pub fn invalid_spec<T: Into<String>>(msg: T) -> Self {
        Error::InvalidSpec(msg.into())
    }

    /// Whether this error is transient store contention (a locked or busy
    /// SQLite database). Callers polling for work treat it as "no job
    /// available" rather than a failure.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}
