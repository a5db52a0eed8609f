//! Repair counters and the repair-lag signal.
//!
//! Observability only: nothing in the repair path branches on these values.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use vindex_types::WriteEventId;

/// Write events currently waiting for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairLag {
    pub pending: usize,
    /// Time since the oldest pending event was first received.
    pub oldest_age: Option<Duration>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub events_skipped: u64,
    pub entries_removed: u64,
    pub repairs_failed: u64,
    pub read_repairs_scheduled: u64,
    pub inconsistent_versions: u64,
    pub retries_scheduled: u64,
    pub retries_exhausted: u64,
}

/// Shared repair counters.
#[derive(Debug, Default)]
pub struct RepairMetrics {
    events_processed: AtomicU64,
    events_skipped: AtomicU64,
    entries_removed: AtomicU64,
    repairs_failed: AtomicU64,
    read_repairs_scheduled: AtomicU64,
    inconsistent_versions: AtomicU64,
    retries_scheduled: AtomicU64,
    retries_exhausted: AtomicU64,
    pending_retries: Mutex<HashMap<WriteEventId, Instant>>,
}

impl RepairMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_skipped(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn entry_removed(&self) {
        self.entries_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn repair_failed(&self) {
        self.repairs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read_repairs_scheduled(&self, count: usize) {
        self.read_repairs_scheduled
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn inconsistent_version(&self) {
        self.inconsistent_versions.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks `event` as waiting for a retry. Keeps the first-seen instant if
    /// it was already pending.
    pub(crate) fn retry_pending(&self, event: WriteEventId, first_seen: Instant) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        self.pending_retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_insert(first_seen);
    }

    /// Clears `event` from the pending set (succeeded or abandoned).
    pub(crate) fn retry_settled(&self, event: &WriteEventId) {
        self.pending_retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event);
    }

    pub(crate) fn retry_exhausted(&self, event: &WriteEventId) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
        self.retry_settled(event);
    }

    /// Count and age of events in the retrying state.
    pub fn lag(&self) -> RepairLag {
        let pending = self
            .pending_retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        RepairLag {
            pending: pending.len(),
            oldest_age: pending.values().min().map(Instant::elapsed),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            repairs_failed: self.repairs_failed.load(Ordering::Relaxed),
            read_repairs_scheduled: self.read_repairs_scheduled.load(Ordering::Relaxed),
            inconsistent_versions: self.inconsistent_versions.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
        }
    }
}
