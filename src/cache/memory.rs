//! L1: bounded in-process LRU tier.
//!
//! Two independent limits apply (entry count and aggregate payload bytes).
//! All mutation happens under one tier-wide lock; the critical sections are
//! a hash lookup plus a few link updates.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::entry::{CacheEntry, CacheStats, StatsRecorder};
use crate::cache::lru::LruIndex;
use crate::cache::tier::{CacheTier, TierKind};
use crate::config::MemoryTierConfig;
use crate::error::CacheError;

struct MemoryState {
    entries: LruIndex<CacheEntry>,
    total_bytes: usize,
}

pub struct MemoryTier {
    state: Mutex<MemoryState>,
    config: MemoryTierConfig,
    stats: StatsRecorder,
}

impl MemoryTier {
    pub fn new(config: MemoryTierConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(MemoryState {
                entries: LruIndex::with_capacity(config.max_entries.min(1 << 16)),
                total_bytes: 0,
            }),
            config,
            stats: StatsRecorder::new(),
        })
    }

    /// Convenience constructor for an entry-count bound only.
    pub fn with_max_entries(max_entries: usize) -> Result<Self, CacheError> {
        Self::new(MemoryTierConfig {
            max_entries,
            ..Default::default()
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().map(str::to_owned).collect()
    }

    fn publish_usage(&self, state: &MemoryState) {
        self.stats
            .set_usage(state.entries.len() as u64, state.total_bytes as u64);
    }

    /// Pop LRU entries until both limits hold. Returns the eviction count.
    fn enforce_limits(&self, state: &mut MemoryState) -> u64 {
        let mut evicted = 0;
        while state.entries.len() > self.config.max_entries
            || state.total_bytes > self.config.max_bytes
        {
            match state.entries.pop_lru() {
                Some((key, entry)) => {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.size);
                    evicted += 1;
                    debug!(key = %key, size = entry.size, "Evicted from memory tier");
                }
                None => break,
            }
        }
        evicted
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get_entry(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        let started = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired(started) => true,
            Some(entry) => {
                entry.touch();
                let hit = (entry.value.clone(), entry.remaining_ttl(started));
                drop(state);
                self.stats.record_access(true, started);
                return Some(hit);
            }
            None => false,
        };

        if expired {
            if let Some(entry) = state.entries.remove(key) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size);
            }
            self.publish_usage(&state);
        }
        drop(state);
        self.stats.record_access(false, started);
        None
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let entry = CacheEntry::new(value, ttl);
        if entry.size > self.config.max_bytes {
            debug!(key, size = entry.size, "Value exceeds memory tier budget");
            // The previous value must not outlive a rejected overwrite.
            self.delete(key).await;
            return false;
        }

        let mut state = self.state.lock();
        state.total_bytes += entry.size;
        if let Some(old) = state.entries.insert(key.to_string(), entry) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size);
        }
        let evicted = self.enforce_limits(&mut state);
        self.publish_usage(&state);
        drop(state);

        if evicted > 0 {
            self.stats.record_evictions(evicted);
        }
        true
    }

    async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(key) {
            Some(entry) => {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size);
                self.publish_usage(&state);
                true
            }
            None => false,
        }
    }

    async fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
        self.publish_usage(&state);
    }

    async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let removed = state.entries.remove_where(|_, entry| entry.is_expired(now));
        for (_, entry) in &removed {
            state.total_bytes = state.total_bytes.saturating_sub(entry.size);
        }
        self.publish_usage(&state);
        removed.len()
    }
}
