//! Error types for the repair layer.

use thiserror::Error;
use vindex_storage::StorageError;
use vindex_types::{EntityId, Version, WriteEventId};

/// Result type for repair operations.
pub type RepairResult<T> = Result<T, RepairError>;

/// Errors that can occur while reading through or repairing the index.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The entity store or the index could not serve a request.
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(StorageError),

    /// The index references a version newer than the store's current one.
    #[error("inconsistent version for {entity_id}: index has v{indexed}, store reports v{authoritative}")]
    InconsistentVersion {
        entity_id: EntityId,
        indexed: Version,
        authoritative: Version,
    },

    /// The index rejected the delete of a stale entry.
    #[error("repair of {entity_id} v{version} failed: {reason}")]
    RepairFailed {
        entity_id: EntityId,
        version: Version,
        reason: String,
    },

    /// A write event kept failing and was abandoned.
    #[error("gave up on write event {event_id} for {entity_id} after {attempts} attempts")]
    RetryExhausted {
        event_id: WriteEventId,
        entity_id: EntityId,
        attempts: u32,
    },

    /// Entity not found (or deleted) for a write.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<StorageError> for RepairError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::AdapterUnavailable(other),
        }
    }
}
