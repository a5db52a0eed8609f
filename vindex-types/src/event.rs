//! Write events emitted by the entity store.
//!
//! Every successful write produces one [`WriteEvent`]. Events are delivered
//! at least once; background repair uses them to drop index entries that the
//! write made stale.

use crate::{EntityId, ScopeId, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a write event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteEventId(Uuid);

impl WriteEventId {
    /// Creates a new event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WriteEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WriteEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WriteEventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What the write did to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum WriteKind {
    /// A create or update; `version` is now the current version.
    Written { version: Version },

    /// The entity was deleted; `version` is the tombstone's version.
    Deleted { version: Version },
}

/// Notification that an entity changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEvent {
    /// Unique identifier for this event.
    pub id: WriteEventId,

    /// The entity that was written.
    pub entity_id: EntityId,

    /// Scope the entity lives in.
    pub scope: ScopeId,

    /// Collection the entity belongs to.
    pub collection: String,

    /// The change itself.
    pub kind: WriteKind,
}

impl WriteEvent {
    /// Creates an event for a create or update.
    #[must_use]
    pub fn written(
        entity_id: EntityId,
        scope: ScopeId,
        collection: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            id: WriteEventId::new(),
            entity_id,
            scope,
            collection: collection.into(),
            kind: WriteKind::Written { version },
        }
    }

    /// Creates an event for a delete.
    #[must_use]
    pub fn deleted(
        entity_id: EntityId,
        scope: ScopeId,
        collection: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            id: WriteEventId::new(),
            entity_id,
            scope,
            collection: collection.into(),
            kind: WriteKind::Deleted { version },
        }
    }

    /// The version produced by the write.
    #[must_use]
    pub fn version(&self) -> Version {
        match self.kind {
            WriteKind::Written { version } | WriteKind::Deleted { version } => version,
        }
    }

    /// Returns true for delete events.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self.kind, WriteKind::Deleted { .. })
    }
}
