//! Runtime switch for event-driven repair.
//!
//! Handed to the worker pool at construction. Turning it off makes the
//! workers drop write events instead of repairing, which leaves stale
//! entries in the index for the read path to find.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared on/off flag for the event-driven repair subscription.
#[derive(Debug, Clone)]
pub struct RepairSwitch {
    enabled: Arc<AtomicBool>,
}

impl RepairSwitch {
    /// A switch in the given state.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    /// Sets the state and returns the previous one.
    pub fn set(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!("Event-driven repair {}", if enabled { "enabled" } else { "disabled" });
        }
        previous
    }

    /// Disables repair until the returned guard is dropped, then restores the
    /// previous state.
    pub fn pause(&self) -> SwitchGuard {
        let previous = self.set(false);
        SwitchGuard {
            switch: self.clone(),
            restore: previous,
        }
    }
}

impl Default for RepairSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Restores a [`RepairSwitch`] when dropped.
#[must_use = "dropping the guard immediately re-enables repair"]
#[derive(Debug)]
pub struct SwitchGuard {
    switch: RepairSwitch,
    restore: bool,
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        self.switch.set(self.restore);
    }
}
