//! Core type definitions for vindex.
//!
//! This crate defines the fundamental types shared by the entity store, the
//! search index and the repair subsystem:
//! - Entity and scope identifiers (UUID v7)
//! - Versions and the clock that issues them
//! - Write events
//! - Entity records, index entries and index candidates

mod event;
mod ids;
mod record;
mod version;

pub use event::{WriteEvent, WriteEventId, WriteKind};
pub use ids::{EntityId, ScopeId};
pub use record::{Candidate, EntityRecord, Fields, IndexEntry};
pub use version::{Version, VersionClock};

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid version: {0}")]
    InvalidVersion(String),
}
