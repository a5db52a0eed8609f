//! Repair execution: removes stale and orphaned index entries.
//!
//! Deletes always target one `(entity_id, version)` entry. Deleting by entity
//! id alone could race a concurrent write that is indexing a newer version.

use crate::detector::StaleClassification;
use crate::error::RepairError;
use crate::metrics::RepairMetrics;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use vindex_storage::{DeleteOutcome, EntityStore, SearchIndex};
use vindex_types::{Candidate, Version};

/// Result of repairing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The stale entry was deleted.
    Removed,
    /// Nothing to do: the candidate is current or the entry is already gone.
    Skipped,
    /// The delete failed; the entry may still be there.
    Failed(String),
}

/// Tally of a batch of repairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RepairReport {
    fn record(&mut self, outcome: &RepairOutcome) {
        match outcome {
            RepairOutcome::Removed => self.removed += 1,
            RepairOutcome::Skipped => self.skipped += 1,
            RepairOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.removed + self.skipped + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Issues index deletes for stale and orphaned candidates.
///
/// Safe to share between the read path and the event workers: every
/// operation is idempotent.
pub struct RepairExecutor {
    store: Arc<dyn EntityStore>,
    index: Arc<dyn SearchIndex>,
    metrics: Arc<RepairMetrics>,
    concurrency: usize,
    reindex_current: bool,
}

impl RepairExecutor {
    pub fn new(
        store: Arc<dyn EntityStore>,
        index: Arc<dyn SearchIndex>,
        metrics: Arc<RepairMetrics>,
    ) -> Self {
        Self {
            store,
            index,
            metrics,
            concurrency: 8,
            reindex_current: false,
        }
    }

    /// Maximum deletes in flight for one [`RepairExecutor::repair_all`].
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Re-index the current version after removing a stale one if the
    /// index has no entry for it.
    pub fn with_reindex_current(mut self, enabled: bool) -> Self {
        self.reindex_current = enabled;
        self
    }

    /// Repairs one candidate according to its classification.
    pub async fn repair(
        &self,
        candidate: &Candidate,
        classification: &StaleClassification,
    ) -> RepairOutcome {
        if !classification.needs_repair() {
            return RepairOutcome::Skipped;
        }

        let outcome = match self
            .index
            .delete_entry(&candidate.entity_id, candidate.version)
            .await
        {
            Ok(DeleteOutcome::Deleted) => {
                self.metrics.entry_removed();
                debug!(
                    "Removed {:?} entry {} v{}",
                    classification, candidate.entity_id, candidate.version
                );
                RepairOutcome::Removed
            }
            Ok(DeleteOutcome::Absent) => RepairOutcome::Skipped,
            Err(e) => {
                self.metrics.repair_failed();
                let err = RepairError::RepairFailed {
                    entity_id: candidate.entity_id,
                    version: candidate.version,
                    reason: e.to_string(),
                };
                warn!("{err}");
                return RepairOutcome::Failed(e.to_string());
            }
        };

        if let StaleClassification::Stale { superseded_by } = classification {
            if self.reindex_current {
                self.ensure_indexed(candidate, *superseded_by).await;
            }
        }
        outcome
    }

    /// Repairs a batch with bounded concurrency. Failures never stop the
    /// rest of the batch.
    pub async fn repair_all(&self, items: Vec<(Candidate, StaleClassification)>) -> RepairReport {
        let outcomes: Vec<RepairOutcome> = stream::iter(items)
            .map(|(candidate, classification)| async move {
                self.repair(&candidate, &classification).await
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = RepairReport::default();
        for outcome in &outcomes {
            report.record(outcome);
        }
        report
    }

    async fn ensure_indexed(&self, candidate: &Candidate, current: Version) {
        match self.index.contains(&candidate.entity_id, current).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!("Could not check index for {} v{}: {}", candidate.entity_id, current, e);
                return;
            }
        }

        let record = match self.store.load(&candidate.entity_id).await {
            Ok(Some(record)) if record.version == current => record,
            // moved on or deleted since classification; a later pass handles it
            Ok(_) => return,
            Err(e) => {
                warn!("Could not load {} for re-index: {}", candidate.entity_id, e);
                return;
            }
        };

        match self.index.insert(&record.to_index_entry()).await {
            Ok(()) => debug!("Re-indexed {} v{}", record.id, record.version),
            Err(e) => warn!("Re-index of {} v{} failed: {}", record.id, record.version, e),
        }
    }
}
