//! Entity versions and the clock that issues them.
//!
//! A [`Version`] is a Hybrid Logical Clock timestamp: physical time plus a
//! logical counter. The [`VersionClock`] hands out strictly increasing
//! versions, so successive writes to one entity always compare greater than
//! the previous one even when the wall clock stalls or steps backwards.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A time-ordered, totally ordered version identifier.
///
/// Consists of:
/// - `wall_time`: Milliseconds since Unix epoch (physical component)
/// - `logical`: Logical counter for writes at the same wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Physical time component (milliseconds since Unix epoch).
    wall_time: u64,
    /// Logical counter for ordering writes at the same wall time.
    logical: u32,
}

impl Version {
    /// The smallest possible version. Every issued version compares greater.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a version from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next version, strictly greater than `self`.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_clock_millis();

        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else {
            self.bump()
        }
    }

    // Counter overflow rolls into the next millisecond rather than repeating.
    fn bump(&self) -> Self {
        match self.logical.checked_add(1) {
            Some(logical) => Self::new(self.wall_time, logical),
            None => Self::new(self.wall_time + 1, 0),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_time, self.logical)
    }
}

impl FromStr for Version {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (wall, logical) = s
            .split_once('.')
            .ok_or_else(|| crate::Error::InvalidVersion(s.to_string()))?;
        let wall_time = wall
            .parse()
            .map_err(|_| crate::Error::InvalidVersion(s.to_string()))?;
        let logical = logical
            .parse()
            .map_err(|_| crate::Error::InvalidVersion(s.to_string()))?;
        Ok(Self::new(wall_time, logical))
    }
}

/// Issues strictly increasing versions for entity writes.
///
/// One clock is shared by every writer of a store; it is cheap to call from
/// many threads.
#[derive(Debug)]
pub struct VersionClock {
    last: Mutex<Version>,
}

impl VersionClock {
    /// Creates a clock that continues after `last`.
    #[must_use]
    pub fn starting_after(last: Version) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Issues the next version.
    pub fn next(&self) -> Version {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = last.tick();
        *last = next;
        next
    }
}
