//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found (or already deleted, for writes).
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Invalid data read back from the database or passed in a query.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A connection mutex was poisoned by a panicking holder.
    #[error("connection lock poisoned")]
    LockPoisoned,

    /// The backend could not serve the request (I/O, task failure, outage).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
