//! Persisted entity versions, index entries and the candidates read back
//! from the index.

use crate::{EntityId, ScopeId, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field map of an entity: a JSON object.
pub type Fields = Map<String, Value>;

/// One immutable version of an entity.
///
/// A write never mutates a record; it appends a new one with a greater
/// version. A delete appends a tombstone record with empty fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub version: Version,
    pub scope: ScopeId,
    pub collection: String,
    pub entity_type: String,
    pub fields: Fields,
    /// Version of the create that started this entity's history.
    pub created: Version,
    #[serde(default)]
    pub tombstone: bool,
}

impl EntityRecord {
    /// Extract a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Builds the index entry that makes this version searchable.
    #[must_use]
    pub fn to_index_entry(&self) -> IndexEntry {
        IndexEntry {
            entity_id: self.id,
            version: self.version,
            scope: self.scope,
            collection: self.collection.clone(),
            entity_type: self.entity_type.clone(),
            created: self.created,
            payload: Value::Object(self.fields.clone()),
        }
    }
}

/// A searchable document pointing at one entity version.
///
/// Entries are keyed by `(entity_id, version)`. A newer entry for the same
/// entity supersedes older ones logically, not physically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entity_id: EntityId,
    pub version: Version,
    pub scope: ScopeId,
    pub collection: String,
    pub entity_type: String,
    pub created: Version,
    pub payload: Value,
}

/// A raw index hit. Advisory: the referenced version may be superseded or
/// the entity may be gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub entity_id: EntityId,
    pub version: Version,
    pub entity_type: String,
    /// Value of the query's sort column for this hit.
    pub ordering: Version,
}

impl Candidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        version: Version,
        entity_type: impl Into<String>,
        ordering: Version,
    ) -> Self {
        Self {
            entity_id,
            version,
            entity_type: entity_type.into(),
            ordering,
        }
    }

    /// The `(entity_id, version)` key of the index entry behind this hit.
    #[must_use]
    pub fn key(&self) -> (EntityId, Version) {
        (self.entity_id, self.version)
    }
}
