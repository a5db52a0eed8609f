//! Identifier types used throughout vindex.
//!
//! Both ids are UUID v7, so ids minted later sort later.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mints a fresh time-ordered id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        // Stored as TEXT by the SQLite backends and parsed back on read.
        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Identifier of a logical entity, stable across all of its versions.
    EntityId
}

uuid_id! {
    /// Identifier of the application scope that owns entities and index
    /// entries.
    ScopeId
}

impl EntityId {
    /// Stable 64-bit key used to pick a repair shard.
    ///
    /// Folds both halves so the v7 timestamp prefix does not dominate.
    #[must_use]
    pub fn routing_key(&self) -> u64 {
        let (hi, lo) = self.0.as_u64_pair();
        hi ^ lo.rotate_left(32)
    }
}
