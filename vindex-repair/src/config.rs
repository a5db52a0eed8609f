//! Repair configuration.

use crate::error::{RepairError, RepairResult};
use serde::{Deserialize, Serialize};

/// What the read path does with a hit whose version is newer than the
/// store's current version (a write still in flight, or store lag).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistentPolicy {
    /// Serve the hit as current for this read.
    #[default]
    TreatAsCurrent,
    /// Leave the hit out of the result. It is never repaired.
    Exclude,
}

/// Configuration for read-path and event-driven repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Index page size as a multiple of the caller's limit.
    pub overfetch_factor: usize,
    /// Upper bound on one index page.
    pub max_page_size: usize,
    /// Concurrent deletes per repair batch.
    pub repair_concurrency: usize,
    /// Event worker shards. Events for one entity always hit the same shard.
    pub worker_count: usize,
    /// Attempts per write event before giving up, first attempt included.
    pub max_attempts: u32,
    /// Backoff before the first retry (ms); doubles per attempt.
    pub base_backoff_ms: u64,
    /// Backoff ceiling (ms).
    pub max_backoff_ms: u64,
    pub inconsistent_policy: InconsistentPolicy,
    /// After removing a stale entry, index the current version if missing.
    pub reindex_current: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 2,
            max_page_size: 1000,
            repair_concurrency: 8,
            worker_count: 4,
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            inconsistent_policy: InconsistentPolicy::TreatAsCurrent,
            reindex_current: false,
        }
    }
}

impl RepairConfig {
    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> RepairResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepairError::Config(format!("malformed repair config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the coordinator and worker pool cannot run with.
    pub fn validate(&self) -> RepairResult<()> {
        if self.overfetch_factor == 0 {
            return Err(RepairError::Config("overfetch_factor must be at least 1".into()));
        }
        if self.max_page_size == 0 {
            return Err(RepairError::Config("max_page_size must be at least 1".into()));
        }
        if self.repair_concurrency == 0 {
            return Err(RepairError::Config("repair_concurrency must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(RepairError::Config("worker_count must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(RepairError::Config("max_attempts must be at least 1".into()));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(RepairError::Config(
                "max_backoff_ms must not be below base_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1 = first retry).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        self.base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}
