//! Storage collaborators for vindex.
//!
//! Provides the authoritative versioned entity store, the derived search
//! index, and the in-process bus that carries write events from one to the
//! background repair workers.
//!
//! # Architecture
//!
//! - Entities are stored append-only: every write is a new immutable record
//! - The store publishes a write event after each successful write
//! - The index holds one entry per indexed `(entity, version)` and is never
//!   trusted on its own; readers confirm hits against the store
//! - Both reference backends are SQLite and can run in memory

mod bus;
mod entity_store;
mod error;
mod search_index;
mod sqlite;

pub use bus::{WriteEventBus, WriteEventReceiver};
pub use entity_store::{CurrentVersion, EntityStore, SqliteEntityStore};
pub use error::{StorageError, StorageResult};
pub use search_index::{
    DeleteOutcome, FieldFilter, Query, SearchIndex, SortOrder, SqliteSearchIndex,
};
