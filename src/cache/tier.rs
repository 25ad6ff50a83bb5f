//! The contract every cache tier implements.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::entry::CacheStats;

/// Identifies a level of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    /// L1: in-process memory (hot).
    Memory,
    /// L2: local compressed files (warm).
    Disk,
    /// L3: networked key-value service (cold, shared).
    Distributed,
}

impl TierKind {
    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            TierKind::Memory => 1,
            TierKind::Disk => 2,
            TierKind::Distributed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Disk => "disk",
            TierKind::Distributed => "distributed",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One level of the cache hierarchy.
///
/// Implementations must be safe to call concurrently. A miss is a normal
/// `None`; storage faults are absorbed by the tier (logged, counted in
/// [`CacheStats::errors`]) and surface only as a miss or a `false` write.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Name used as the key in hierarchy statistics.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_entry(key).await.map(|(value, _)| value)
    }

    /// Lookup that also reports the entry's remaining lifetime (`None` when
    /// it never expires). Counts as an access, like [`CacheTier::get`].
    async fn get_entry(&self, key: &str) -> Option<(Bytes, Option<Duration>)>;

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool;

    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self);

    /// Residency probe that does not count as an access.
    async fn contains(&self, key: &str) -> bool;

    fn stats(&self) -> CacheStats;

    /// Drop expired entries now. Returns how many were removed.
    async fn purge_expired(&self) -> usize {
        0
    }

    /// Teardown hook, called once by the coordinator on shutdown.
    async fn flush(&self) {}
}
