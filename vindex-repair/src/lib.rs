//! Stale-index detection and repair for vindex.
//!
//! The search index is updated asynchronously and may hold several entries
//! for one entity: the current version plus superseded ones, or entries for
//! an entity that no longer exists. This crate keeps those from reaching
//! callers and removes them.
//!
//! # Components
//!
//! - **Detector**: classifies a hit as current, stale or orphaned
//! - **Executor**: deletes a single stale `(entity, version)` entry
//! - **Coordinator**: repair-on-read; filters every search and repairs what
//!   it finds in the background
//! - **Workers**: consume write events and remove superseded entries before
//!   anyone reads them
//!
//! The read path alone guarantees that a search never returns two hits for
//! one entity or a hit for a superseded or deleted version. The workers only
//! shorten the time stale entries stay in the index.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vindex_repair::{RepairConfig, RepairService, RepairSwitch};
//! use vindex_storage::{Query, SqliteEntityStore, SqliteSearchIndex, WriteEventBus};
//! use vindex_types::ScopeId;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = WriteEventBus::new();
//! let store = Arc::new(SqliteEntityStore::open_in_memory()?.with_bus(bus.clone()));
//! let index = Arc::new(SqliteSearchIndex::open_in_memory()?);
//! let service = RepairService::start(
//!     store,
//!     index,
//!     &bus,
//!     RepairConfig::default(),
//!     RepairSwitch::default(),
//! )?;
//!
//! let em = service.manager(ScopeId::new());
//! let dog = em.create("dogs", "dog", serde_json::Map::new()).await?;
//! let hits = em.search("dogs", &Query::all(), 10).await?;
//! assert_eq!(hits.entity_ids(), vec![dog.id]);
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod detector;
mod error;
mod executor;
mod manager;
mod metrics;
mod service;
mod switch;
mod worker;

pub use config::{InconsistentPolicy, RepairConfig};
pub use coordinator::{ReadRepairCoordinator, ResultSet};
pub use detector::{classify, StaleClassification, StaleDetector};
pub use error::{RepairError, RepairResult};
pub use executor::{RepairExecutor, RepairOutcome, RepairReport};
pub use manager::EntityManager;
pub use metrics::{MetricsSnapshot, RepairLag, RepairMetrics};
pub use service::RepairService;
pub use switch::{RepairSwitch, SwitchGuard};
pub use worker::{
    spawn_repair_workers, superseded_entries, EventRepairer, RepairState, RepairWorkerHandle,
};
