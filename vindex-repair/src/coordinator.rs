//! Repair-on-read.
//!
//! The coordinator treats the index as a hint source. Every page of raw
//! candidates is checked against the entity store; only the current version
//! of each live entity reaches the caller. Stale and orphaned hits are
//! dropped from the result and their entries deleted in the background.

use crate::config::RepairConfig;
use crate::detector::{StaleClassification, StaleDetector};
use crate::error::RepairResult;
use crate::executor::{RepairExecutor, RepairReport};
use crate::metrics::RepairMetrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use vindex_storage::{CurrentVersion, EntityStore, Query, SearchIndex};
use vindex_types::{Candidate, EntityId, ScopeId, Version};

/// A clean page of search results: one current candidate per entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Surviving candidates in the index's order.
    pub candidates: Vec<Candidate>,
    /// Raw candidates read from the index to build this result.
    pub scanned: usize,
    /// Stale or orphaned entries handed to the repair executor.
    pub repairs_scheduled: usize,
    /// True when the index had no more matching entries and every live
    /// entity found was returned.
    pub exhausted: bool,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.candidates.iter().map(|c| c.entity_id).collect()
    }
}

/// Reads through the index, filtering and repairing as it goes.
pub struct ReadRepairCoordinator {
    store: Arc<dyn EntityStore>,
    index: Arc<dyn SearchIndex>,
    executor: Arc<RepairExecutor>,
    detector: StaleDetector,
    metrics: Arc<RepairMetrics>,
    config: RepairConfig,
}

/// Per-search bookkeeping.
#[derive(Default)]
struct Selection {
    /// One kept candidate per entity, in first-seen order.
    kept: Vec<Candidate>,
    slot_of: HashMap<EntityId, usize>,
    repairs: Vec<(Candidate, StaleClassification)>,
    queued: HashSet<(EntityId, Version)>,
}

impl Selection {
    fn live(&self) -> usize {
        self.kept.len()
    }

    fn keep(&mut self, candidate: Candidate) {
        let Some(slot) = self.slot_of.get(&candidate.entity_id).copied() else {
            self.slot_of.insert(candidate.entity_id, self.kept.len());
            self.kept.push(candidate);
            return;
        };
        let existing = &mut self.kept[slot];
        if existing.version == candidate.version {
            return;
        }

        // Two current hits for one entity only happen while the store lags
        // the index; keep the newest, repair the other.
        let loser = if candidate.version > existing.version {
            std::mem::replace(existing, candidate)
        } else {
            candidate
        };
        let superseded_by = existing.version;
        debug!(
            "Duplicate current hits for {}: keeping v{} over v{}",
            loser.entity_id, superseded_by, loser.version
        );
        self.repair(loser, StaleClassification::Stale { superseded_by });
    }

    fn repair(&mut self, candidate: Candidate, classification: StaleClassification) {
        if self.queued.insert(candidate.key()) {
            self.repairs.push((candidate, classification));
        }
    }

    fn into_parts(self, limit: usize) -> (Vec<Candidate>, Vec<(Candidate, StaleClassification)>) {
        let mut kept = self.kept;
        kept.truncate(limit);
        (kept, self.repairs)
    }
}

impl ReadRepairCoordinator {
    /// Fails with [`RepairError::Config`](crate::RepairError::Config) if
    /// `config` would leave the read path without a usable page size.
    pub fn new(
        store: Arc<dyn EntityStore>,
        index: Arc<dyn SearchIndex>,
        executor: Arc<RepairExecutor>,
        metrics: Arc<RepairMetrics>,
        config: RepairConfig,
    ) -> RepairResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            index,
            executor,
            detector: StaleDetector::new(config.inconsistent_policy, metrics.clone()),
            metrics,
            config,
        })
    }

    /// Searches `collection` and returns at most `limit` current candidates,
    /// at most one per entity. Repairs run detached from the caller.
    pub async fn search(
        &self,
        scope: &ScopeId,
        collection: &str,
        query: &Query,
        limit: usize,
    ) -> RepairResult<ResultSet> {
        let (results, _repairs) = self
            .search_with_repairs(scope, collection, query, limit)
            .await?;
        Ok(results)
    }

    /// Like [`ReadRepairCoordinator::search`], also returning the handle of
    /// the background repair task if one was started.
    pub async fn search_with_repairs(
        &self,
        scope: &ScopeId,
        collection: &str,
        query: &Query,
        limit: usize,
    ) -> RepairResult<(ResultSet, Option<JoinHandle<RepairReport>>)> {
        if limit == 0 {
            return Ok((ResultSet::default(), None));
        }

        let page_size = limit
            .saturating_mul(self.config.overfetch_factor)
            .clamp(1, self.config.max_page_size);
        let mut selection = Selection::default();
        let mut offset = 0;
        let mut scanned = 0;
        let exhausted = loop {
            let page = self
                .index
                .query(scope, collection, query, page_size, offset)
                .await?;
            let fetched = page.len();
            offset += fetched;
            scanned += fetched;

            self.select_page(page, &mut selection).await?;

            if fetched < page_size {
                break true;
            }
            if selection.live() >= limit {
                break false;
            }
        };

        // Live entities cut by the limit are still unread by the caller.
        let exhausted = exhausted && selection.live() <= limit;
        let (candidates, repairs) = selection.into_parts(limit);
        let repairs_scheduled = repairs.len();
        debug!(
            "Search {}/{}: scanned {}, returning {}, repairing {}",
            scope,
            collection,
            scanned,
            candidates.len(),
            repairs_scheduled
        );

        // Launched only after paging so deletes cannot shift later offsets.
        let handle = if repairs.is_empty() {
            None
        } else {
            self.metrics.read_repairs_scheduled(repairs_scheduled);
            let executor = self.executor.clone();
            Some(tokio::spawn(async move { executor.repair_all(repairs).await }))
        };

        Ok((
            ResultSet {
                candidates,
                scanned,
                repairs_scheduled,
                exhausted,
            },
            handle,
        ))
    }

    async fn select_page(
        &self,
        page: Vec<Candidate>,
        selection: &mut Selection,
    ) -> RepairResult<()> {
        let mut seen = HashSet::new();
        let ids: Vec<EntityId> = page
            .iter()
            .map(|c| c.entity_id)
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let current = self.store.current_versions(&ids).await?;

        for candidate in page {
            let authoritative = current
                .get(&candidate.entity_id)
                .and_then(CurrentVersion::live);
            match self.detector.detect(&candidate, authoritative) {
                None => {}
                Some(StaleClassification::Current) => selection.keep(candidate),
                Some(classification) => selection.repair(candidate, classification),
            }
        }
        Ok(())
    }
}
