//! Stale detection.
//!
//! Compares an index candidate's version with the store's authoritative
//! version for the same entity.

use crate::config::InconsistentPolicy;
use crate::error::RepairError;
use crate::metrics::RepairMetrics;
use std::sync::Arc;
use tracing::warn;
use vindex_types::{Candidate, Version};

/// How a candidate relates to the entity's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleClassification {
    /// The candidate points at the current version.
    Current,
    /// A newer version exists.
    Stale { superseded_by: Version },
    /// The entity was deleted or never existed.
    Orphaned,
}

impl StaleClassification {
    /// Whether the index entry behind the candidate should be removed.
    pub fn needs_repair(&self) -> bool {
        !matches!(self, Self::Current)
    }
}

/// Classifies `candidate` against the authoritative version.
///
/// `authoritative` is `None` when the entity is deleted or unknown. An index
/// version newer than the authoritative one is returned as
/// [`RepairError::InconsistentVersion`].
pub fn classify(
    candidate: &Candidate,
    authoritative: Option<Version>,
) -> Result<StaleClassification, RepairError> {
    let Some(current) = authoritative else {
        return Ok(StaleClassification::Orphaned);
    };

    if current > candidate.version {
        Ok(StaleClassification::Stale {
            superseded_by: current,
        })
    } else if current == candidate.version {
        Ok(StaleClassification::Current)
    } else {
        Err(RepairError::InconsistentVersion {
            entity_id: candidate.entity_id,
            indexed: candidate.version,
            authoritative: current,
        })
    }
}

/// [`classify`] plus the policy for inconsistent versions.
#[derive(Debug, Clone)]
pub struct StaleDetector {
    policy: InconsistentPolicy,
    metrics: Arc<RepairMetrics>,
}

impl StaleDetector {
    pub fn new(policy: InconsistentPolicy, metrics: Arc<RepairMetrics>) -> Self {
        Self { policy, metrics }
    }

    /// Classifies a candidate. `None` means: leave it out of the result and
    /// do not repair it.
    pub fn detect(
        &self,
        candidate: &Candidate,
        authoritative: Option<Version>,
    ) -> Option<StaleClassification> {
        match classify(candidate, authoritative) {
            Ok(classification) => Some(classification),
            Err(anomaly) => {
                self.metrics.inconsistent_version();
                warn!("{anomaly}; applying {:?}", self.policy);
                match self.policy {
                    InconsistentPolicy::TreatAsCurrent => Some(StaleClassification::Current),
                    InconsistentPolicy::Exclude => None,
                }
            }
        }
    }
}
