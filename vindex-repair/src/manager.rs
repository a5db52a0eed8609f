//! Entity manager: the write path plus searches through the coordinator.
//!
//! Each write stores a new version and indexes it immediately. Cleaning up
//! the entries the write superseded is left to the event workers and the
//! read path.

use crate::coordinator::{ReadRepairCoordinator, ResultSet};
use crate::error::RepairResult;
use std::sync::Arc;
use tracing::debug;
use vindex_storage::{EntityStore, Query, SearchIndex};
use vindex_types::{Candidate, EntityId, EntityRecord, Fields, ScopeId, Version};

/// Application-scoped CRUD and search over one store/index pair.
#[derive(Clone)]
pub struct EntityManager {
    scope: ScopeId,
    store: Arc<dyn EntityStore>,
    index: Arc<dyn SearchIndex>,
    coordinator: Arc<ReadRepairCoordinator>,
}

impl EntityManager {
    pub fn new(
        scope: ScopeId,
        store: Arc<dyn EntityStore>,
        index: Arc<dyn SearchIndex>,
        coordinator: Arc<ReadRepairCoordinator>,
    ) -> Self {
        Self {
            scope,
            store,
            index,
            coordinator,
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Creates an entity and indexes its first version.
    pub async fn create(
        &self,
        collection: &str,
        entity_type: &str,
        fields: Fields,
    ) -> RepairResult<EntityRecord> {
        let record = self
            .store
            .create(self.scope, collection, entity_type, fields)
            .await?;
        self.index.insert(&record.to_index_entry()).await?;
        Ok(record)
    }

    /// Current record of a live entity.
    pub async fn get(&self, id: &EntityId) -> RepairResult<Option<EntityRecord>> {
        Ok(self.store.load(id).await?)
    }

    /// Writes a new version with `fields` merged over the current ones and
    /// indexes it. Older entries stay in the index until repaired.
    pub async fn update_properties(
        &self,
        id: &EntityId,
        fields: Fields,
    ) -> RepairResult<EntityRecord> {
        let record = self.store.update(id, fields).await?;
        self.index.insert(&record.to_index_entry()).await?;
        debug!("Indexed {} v{}", record.id, record.version);
        Ok(record)
    }

    /// Deletes an entity. Its index entries become orphans until repaired.
    pub async fn delete(&self, id: &EntityId) -> RepairResult<Version> {
        Ok(self.store.delete(id).await?)
    }

    /// Repair-on-read search over one collection.
    pub async fn search(
        &self,
        collection: &str,
        query: &Query,
        limit: usize,
    ) -> RepairResult<ResultSet> {
        self.coordinator
            .search(&self.scope, collection, query, limit)
            .await
    }

    /// Searches and loads the current record of each hit. Hits whose entity
    /// changed between the search and the load are left out.
    pub async fn search_records(
        &self,
        collection: &str,
        query: &Query,
        limit: usize,
    ) -> RepairResult<Vec<EntityRecord>> {
        let results = self.search(collection, query, limit).await?;
        let mut records = Vec::with_capacity(results.len());
        for candidate in results.iter() {
            if let Some(record) = self.store.load(&candidate.entity_id).await? {
                if record.version == candidate.version {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Raw index hits, stale entries included. For diagnostics and tests.
    pub async fn raw_candidates(
        &self,
        collection: &str,
        query: &Query,
        limit: usize,
    ) -> RepairResult<Vec<Candidate>> {
        Ok(self
            .index
            .query(&self.scope, collection, query, limit, 0)
            .await?)
    }
}
