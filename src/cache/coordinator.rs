//! Cache coordinator: the single entry point to the tier hierarchy.
//!
//! The coordinator:
//! - Queries tiers fastest first and stops at the first hit
//! - Promotes values found in slower tiers once they are accessed often enough
//! - Prefetches related keys into L1 after a hit
//! - Fans writes, deletes and clears out to every tier
//!
//! Promotion and prefetch run on a [`TaskTracker`] so a caller never waits on
//! them. A copy keeps the remaining TTL of its source and is dropped if the
//! key was written after it was read (see [`WriteFence`]). Access counts,
//! recent keys and the relationship graph are advisory and live under one
//! coordinator-local lock that is never held across I/O.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::{self, join_all};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::disk::DiskTier;
use crate::cache::distributed::DistributedTier;
use crate::cache::entry::CacheStats;
use crate::cache::fence::WriteFence;
use crate::cache::memory::MemoryTier;
use crate::cache::prefetcher::{
    collect_candidates, GraphNeighbors, PrefetchContext, RelatedKeys, RelationshipGraph,
    SharedPrefix,
};
use crate::cache::tier::CacheTier;
use crate::config::{Config, CoordinatorConfig};
use crate::error::CacheError;

/// Candidates proposed per prefetch round, as a multiple of `max_prefetch`.
/// Resident keys are skipped, so the pool is larger than the warm budget.
const CANDIDATE_POOL_FACTOR: usize = 4;

/// Entries stored concurrently by [`CacheCoordinator::warm`].
const WARM_CONCURRENCY: usize = 16;

/// Snapshot returned by [`CacheCoordinator::get_statistics`].
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyStats {
    /// Per-tier statistics keyed by tier name.
    pub tiers: BTreeMap<String, CacheStats>,
    /// Keys with at least one registered relationship.
    pub relationship_graph_size: usize,
    /// Keys currently in the access-count table.
    pub tracked_keys: usize,
}

#[derive(Default)]
struct CoordinatorState {
    access_counts: HashMap<String, u64>,
    graph: RelationshipGraph,
    recent: VecDeque<String>,
}

struct Inner {
    tiers: Vec<Arc<dyn CacheTier>>,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    heuristics: Vec<Box<dyn RelatedKeys>>,
    tasks: TaskTracker,
    fence: WriteFence,
    /// Kept separately so maintenance can reconnect it.
    distributed: Option<Arc<DistributedTier>>,
}

/// Handle to a tier hierarchy. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

/// The heuristics enabled by default: explicit relationships, then prefixes.
pub fn default_heuristics(config: &CoordinatorConfig) -> Vec<Box<dyn RelatedKeys>> {
    vec![
        Box::new(GraphNeighbors),
        Box::new(SharedPrefix::new(config.prefix_separator)),
    ]
}

impl CacheCoordinator {
    /// Build a coordinator over `tiers`, fastest first.
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>, config: CoordinatorConfig) -> Result<Self, CacheError> {
        let heuristics = default_heuristics(&config);
        Self::with_heuristics(tiers, config, heuristics)
    }

    /// Build a coordinator with a custom set of prefetch heuristics.
    pub fn with_heuristics(
        tiers: Vec<Arc<dyn CacheTier>>,
        config: CoordinatorConfig,
        heuristics: Vec<Box<dyn RelatedKeys>>,
    ) -> Result<Self, CacheError> {
        Self::assemble(tiers, config, heuristics, None)
    }

    fn assemble(
        tiers: Vec<Arc<dyn CacheTier>>,
        config: CoordinatorConfig,
        heuristics: Vec<Box<dyn RelatedKeys>>,
        distributed: Option<Arc<DistributedTier>>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        if tiers.is_empty() {
            return Err(CacheError::config("a cache hierarchy needs at least one tier"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                tiers,
                config,
                state: Mutex::new(CoordinatorState::default()),
                heuristics,
                tasks: TaskTracker::new(),
                fence: WriteFence::new(),
                distributed,
            }),
        })
    }

    /// Build the standard memory → disk → distributed hierarchy.
    ///
    /// A disk tier that cannot be opened is left out with a warning; the
    /// hierarchy still works from memory (and the distributed tier, if any).
    pub async fn from_config(config: &Config) -> Result<Self, CacheError> {
        config.validate()?;
        let mut tiers: Vec<Arc<dyn CacheTier>> =
            vec![Arc::new(MemoryTier::new(config.memory.clone())?)];

        if config.disk.enabled {
            match DiskTier::open(config.disk.clone()).await {
                Ok(disk) => tiers.push(Arc::new(disk)),
                Err(e) => warn!(
                    dir = %config.disk.cache_dir.display(),
                    error = %e,
                    "Disk tier unavailable, continuing without it"
                ),
            }
        }

        let mut distributed = None;
        if config.distributed.enabled {
            let tier = Arc::new(DistributedTier::connect(config.distributed.clone()).await?);
            tiers.push(tier.clone());
            distributed = Some(tier);
        }

        let names: Vec<&str> = tiers.iter().map(|t| t.name()).collect();
        info!(tiers = ?names, "Cache hierarchy ready");

        let heuristics = default_heuristics(&config.coordinator);
        Self::assemble(tiers, config.coordinator.clone(), heuristics, distributed)
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheTier>] {
        &self.inner.tiers
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Look a key up, fastest tier first.
    ///
    /// A hit in a slower tier may schedule a promotion; any hit may schedule
    /// a prefetch round. Neither delays the return.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let count = self.inner.record_access(key);
        let token = self.inner.fence.token(key);

        for (idx, tier) in self.inner.tiers.iter().enumerate() {
            let Some((value, remaining)) = tier.get_entry(key).await else {
                continue;
            };
            if idx > 0 && count >= self.inner.config.promotion_threshold {
                let source = CopySource {
                    expires_at: deadline(remaining),
                    token,
                };
                self.spawn_promotion(key, value.clone(), idx, source);
            }
            if self.prefetch_active() {
                self.spawn_prefetch(key);
            }
            return Some(value);
        }
        None
    }

    /// Write to every tier concurrently. True only if every tier stored it.
    ///
    /// A failure in a lower tier does not undo writes that succeeded above it.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let _guard = self.inner.fence.write(key).await;
        let results = join_all(
            self.inner
                .tiers
                .iter()
                .map(|tier| tier.set(key, value.clone(), ttl)),
        )
        .await;
        results.into_iter().all(|stored| stored)
    }

    /// Remove a key from every tier. True if any tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let _guard = self.inner.fence.write(key).await;
        let results = join_all(self.inner.tiers.iter().map(|tier| tier.delete(key))).await;
        results.into_iter().any(|removed| removed)
    }

    /// Clear every tier and forget access history. Relationships are kept.
    pub async fn clear(&self) {
        let guards = self.inner.fence.write_all().await;
        join_all(self.inner.tiers.iter().map(|tier| tier.clear())).await;
        drop(guards);
        let mut state = self.inner.state.lock();
        state.access_counts.clear();
        state.recent.clear();
        info!("Cache hierarchy cleared");
    }

    /// Bulk `set`. Returns how many entries every tier accepted.
    pub async fn warm<I>(&self, entries: I, ttl: Option<Duration>) -> usize
    where
        I: IntoIterator<Item = (String, Bytes)>,
    {
        let stored = stream::iter(entries)
            .map(|(key, value)| async move { self.set(&key, value, ttl).await })
            .buffer_unordered(WARM_CONCURRENCY)
            .fold(0, |stored, ok| future::ready(stored + usize::from(ok)))
            .await;
        debug!(stored, "Warmed cache");
        stored
    }

    /// Record that two keys tend to be requested together.
    pub fn add_key_relationship(&self, a: &str, b: &str) {
        self.inner.state.lock().graph.add(a, b);
    }

    pub fn get_statistics(&self) -> HierarchyStats {
        let tiers = self
            .inner
            .tiers
            .iter()
            .map(|tier| (tier.name().to_string(), tier.stats()))
            .collect();
        let state = self.inner.state.lock();
        HierarchyStats {
            tiers,
            relationship_graph_size: state.graph.len(),
            tracked_keys: state.access_counts.len(),
        }
    }

    /// Sweep expired entries in every tier. Returns the total removed.
    pub async fn purge_expired(&self) -> usize {
        join_all(self.inner.tiers.iter().map(|tier| tier.purge_expired()))
            .await
            .into_iter()
            .sum()
    }

    /// Periodic upkeep: expiry sweep plus a reconnect attempt for a
    /// disabled distributed tier.
    pub async fn maintain(&self) {
        let purged = self.purge_expired().await;
        if purged > 0 {
            info!(purged, "Maintenance sweep");
        }
        if let Some(distributed) = &self.inner.distributed {
            distributed.reconnect().await;
        }
    }

    /// Wait for every promotion and prefetch scheduled so far.
    pub async fn flush(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Drain background work, then let each tier tear down.
    pub async fn shutdown(&self) {
        self.flush().await;
        join_all(self.inner.tiers.iter().map(|tier| tier.flush())).await;
        info!("Cache hierarchy shut down");
    }

    fn prefetch_active(&self) -> bool {
        let config = &self.inner.config;
        config.prefetch_enabled
            && config.max_prefetch > 0
            && self.inner.tiers.len() > 1
            && !self.inner.heuristics.is_empty()
    }

    fn spawn_promotion(&self, key: &str, value: Bytes, found_at: usize, source: CopySource) {
        let inner = self.inner.clone();
        let key = key.to_string();
        self.inner.tasks.spawn(async move {
            if inner.copy_up(&inner.tiers[..found_at], &key, value, source).await {
                debug!(key = %key, from = inner.tiers[found_at].name(), "Promoted");
            }
        });
    }

    fn spawn_prefetch(&self, key: &str) {
        let inner = self.inner.clone();
        let key = key.to_string();
        self.inner.tasks.spawn(async move {
            let warmed = inner.prefetch(&key).await;
            if warmed > 0 {
                debug!(key = %key, warmed, "Prefetched related keys");
            }
        });
    }
}

/// Where a value being copied upward came from.
#[derive(Debug, Clone, Copy)]
struct CopySource {
    /// Expiry of the source entry, if any.
    expires_at: Option<Instant>,
    /// Write epoch observed before the source was read.
    token: u64,
}

/// Absolute deadline for a remaining lifetime. Too far out to represent
/// means no expiry.
fn deadline(remaining: Option<Duration>) -> Option<Instant> {
    remaining.and_then(|left| Instant::now().checked_add(left))
}

impl Inner {
    /// TTL for a copy placed in a faster tier: the source's remaining
    /// lifetime, capped by `promotion_ttl`. The outer `None` means the
    /// source has already expired.
    fn copy_ttl(&self, expires_at: Option<Instant>) -> Option<Option<Duration>> {
        let cap = self.config.promotion_ttl();
        let Some(at) = expires_at else {
            return Some(cap);
        };
        let left = at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return None;
        }
        Some(Some(cap.map_or(left, |cap| cap.min(left))))
    }

    /// Copy a value read from a slower tier into `targets`. Returns whether
    /// any target stored it.
    async fn copy_up(
        &self,
        targets: &[Arc<dyn CacheTier>],
        key: &str,
        value: Bytes,
        source: CopySource,
    ) -> bool {
        let Some(ttl) = self.copy_ttl(source.expires_at) else {
            return false;
        };
        let Some(_guard) = self.fence.copy_guard(key, source.token).await else {
            debug!(key, "Copy skipped, key written since it was read");
            return false;
        };
        let mut stored = false;
        for tier in targets {
            stored |= tier.set(key, value.clone(), ttl).await;
        }
        stored
    }

    /// Bump the access count for `key` and remember it as recent.
    fn record_access(&self, key: &str) -> u64 {
        let mut state = self.state.lock();

        if state.access_counts.len() >= self.config.max_tracked_keys
            && !state.access_counts.contains_key(key)
        {
            debug!(tracked = state.access_counts.len(), "Access table full, resetting");
            state.access_counts.clear();
        }
        let count = {
            let count = state.access_counts.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if self.config.recent_keys_window > 0 {
            if let Some(pos) = state.recent.iter().position(|k| k == key) {
                state.recent.remove(pos);
            }
            state.recent.push_back(key.to_string());
            while state.recent.len() > self.config.recent_keys_window {
                state.recent.pop_front();
            }
        }
        count
    }

    /// Copy related keys already held by a lower tier into L1. Returns how
    /// many were copied. Keys absent everywhere are left alone.
    async fn prefetch(&self, key: &str) -> usize {
        let budget = self.config.max_prefetch;
        let candidates = {
            let state = self.state.lock();
            let ctx = PrefetchContext {
                graph: &state.graph,
                recent: &state.recent,
            };
            collect_candidates(
                &self.heuristics,
                key,
                &ctx,
                budget.saturating_mul(CANDIDATE_POOL_FACTOR),
            )
        };

        let Some((top, lower)) = self.tiers.split_first() else {
            return 0;
        };
        let mut attempted = 0;
        let mut warmed = 0;
        for candidate in candidates {
            if attempted >= budget {
                break;
            }
            if top.contains(&candidate).await {
                continue;
            }
            attempted += 1;
            let token = self.fence.token(&candidate);
            for tier in lower {
                if let Some((value, remaining)) = tier.get_entry(&candidate).await {
                    let source = CopySource {
                        expires_at: deadline(remaining),
                        token,
                    };
                    if self
                        .copy_up(std::slice::from_ref(top), &candidate, value, source)
                        .await
                    {
                        warmed += 1;
                    }
                    break;
                }
            }
        }
        warmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use crate::cache::backend::InMemoryBackend;
    use crate::cache::tier::TierKind;
    use crate::config::DistributedTierConfig;

    /// A lower tier that counts how often it is consulted.
    struct CountingTier {
        name: &'static str,
        store: MemoryTier,
        gets: AtomicU64,
    }

    impl CountingTier {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                store: MemoryTier::with_max_entries(1_000).unwrap(),
                gets: AtomicU64::new(0),
            })
        }

        fn gets(&self) -> u64 {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CacheTier for CountingTier {
        fn kind(&self) -> TierKind {
            TierKind::Disk
        }

        fn name(&self) -> &str {
            self.name
        }

        async fn get_entry(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.store.get_entry(key).await
        }

        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
            self.store.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> bool {
            self.store.delete(key).await
        }

        async fn clear(&self) {
            self.store.clear().await
        }

        async fn contains(&self, key: &str) -> bool {
            self.store.contains(key).await
        }

        fn stats(&self) -> CacheStats {
            self.store.stats()
        }
    }

    fn memory() -> Arc<MemoryTier> {
        Arc::new(MemoryTier::with_max_entries(1_000).unwrap())
    }

    fn coordinator(tiers: Vec<Arc<dyn CacheTier>>) -> CacheCoordinator {
        CacheCoordinator::new(tiers, CoordinatorConfig::default()).unwrap()
    }

    fn v(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);

        assert!(cache.set("k", v("value"), None).await);
        assert!(l1.contains("k").await);
        assert!(l2.contains("k").await);
        assert_eq!(cache.get("k").await, Some(v("value")));
        assert_eq!(l2.gets(), 0);
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_promotion_after_threshold() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);
        l2.set("k", v("deep"), None).await;

        // First access: below the threshold of 2, nothing is promoted.
        assert_eq!(cache.get("k").await, Some(v("deep")));
        cache.flush().await;
        assert!(!l1.contains("k").await);

        // Second access reaches the threshold.
        assert_eq!(cache.get("k").await, Some(v("deep")));
        cache.flush().await;
        assert!(l1.contains("k").await);

        // The slow tier is no longer consulted.
        let before = l2.gets();
        for _ in 0..5 {
            assert_eq!(cache.get("k").await, Some(v("deep")));
        }
        assert_eq!(l2.gets(), before);
    }

    #[tokio::test]
    async fn test_promotion_fills_every_faster_tier() {
        let l1 = memory();
        let l2 = CountingTier::new("middle");
        let l3 = CountingTier::new("bottom");
        let config = CoordinatorConfig {
            promotion_threshold: 1,
            prefetch_enabled: false,
            ..Default::default()
        };
        let cache = CacheCoordinator::new(vec![l1.clone(), l2.clone(), l3.clone()], config).unwrap();
        l3.set("k", v("x"), None).await;

        cache.get("k").await;
        cache.flush().await;
        assert!(l1.contains("k").await);
        assert!(l2.contains("k").await);
    }

    #[tokio::test]
    async fn test_degrades_with_distributed_disabled() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_online(false);
        let l3 = Arc::new(
            DistributedTier::with_backend(
                backend,
                DistributedTierConfig {
                    enabled: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap(),
        );
        assert!(!l3.is_enabled());

        let l1 = memory();
        let cache = coordinator(vec![l1.clone(), l3]);

        // The write is only partial, but the value is still served.
        assert!(!cache.set("k", v("local"), None).await);
        assert_eq!(cache.get("k").await, Some(v("local")));
        assert!(cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_prefetch_related_keys_into_l1() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);

        l2.set("user:1", v("a"), None).await;
        l2.set("user:1:avatar", v("b"), None).await;
        cache.add_key_relationship("user:1", "user:1:avatar");
        cache.add_key_relationship("user:1", "never-stored");

        assert_eq!(cache.get("user:1").await, Some(v("a")));
        cache.flush().await;

        assert!(l1.contains("user:1:avatar").await);
        // Prefetch only moves data; it never invents values.
        assert!(!l1.contains("never-stored").await);
        assert!(!l2.contains("never-stored").await);
    }

    #[tokio::test]
    async fn test_prefetch_by_shared_prefix() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);

        l2.set("doc:7:chunk:1", v("1"), None).await;
        l2.set("doc:7:chunk:2", v("2"), None).await;

        // One cold read: below the promotion threshold, so it stays in L2.
        cache.get("doc:7:chunk:2").await;
        cache.flush().await;
        assert!(!l1.contains("doc:7:chunk:2").await);

        cache.get("doc:7:chunk:1").await;
        cache.flush().await;
        assert!(l1.contains("doc:7:chunk:2").await);
    }

    #[tokio::test]
    async fn test_prefetch_disabled() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let config = CoordinatorConfig {
            prefetch_enabled: false,
            ..Default::default()
        };
        let cache = CacheCoordinator::new(vec![l1.clone(), l2.clone()], config).unwrap();
        l2.set("a", v("1"), None).await;
        l2.set("b", v("2"), None).await;
        cache.add_key_relationship("a", "b");

        cache.get("a").await;
        cache.flush().await;
        assert!(!l1.contains("b").await);
    }

    #[tokio::test]
    async fn test_clear_resets_tracking_keeps_graph() {
        let l1 = memory();
        let cache = coordinator(vec![l1.clone()]);
        cache.set("a", v("1"), None).await;
        cache.get("a").await;
        cache.add_key_relationship("a", "b");

        cache.clear().await;
        let stats = cache.get_statistics();
        assert_eq!(stats.tracked_keys, 0);
        assert_eq!(stats.relationship_graph_size, 2);
        assert!(l1.is_empty());
    }

    #[tokio::test]
    async fn test_warm_and_statistics() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);

        let entries = (0..10).map(|i| (format!("k{i}"), Bytes::from(vec![i as u8; 8])));
        assert_eq!(cache.warm(entries, None).await, 10);
        cache.get("k3").await;
        cache.get("nope").await;

        let stats = cache.get_statistics();
        assert_eq!(stats.tiers.len(), 2);
        let l1_stats = stats.tiers["memory"];
        assert_eq!(l1_stats.entries, 10);
        assert_eq!(l1_stats.hits, 1);
        assert_eq!(l1_stats.misses, 1);
        assert_eq!(stats.tiers["slow"].misses, 1);
        assert_eq!(stats.tracked_keys, 2);
    }

    #[tokio::test]
    async fn test_access_table_is_bounded() {
        let config = CoordinatorConfig {
            max_tracked_keys: 3,
            ..Default::default()
        };
        let cache = CacheCoordinator::new(vec![memory()], config).unwrap();
        for key in ["a", "b", "c", "d"] {
            cache.get(key).await;
        }
        assert_eq!(cache.get_statistics().tracked_keys, 1);
    }

    #[tokio::test]
    async fn test_purge_expired_fans_out() {
        let l1 = memory();
        let cache = coordinator(vec![l1.clone()]);
        cache.set("short", v("x"), Some(Duration::from_millis(5))).await;
        cache.set("long", v("y"), None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(l1.len(), 1);
    }

    #[tokio::test]
    async fn test_promoted_copy_keeps_source_ttl() {
        let l1 = memory();
        let l2 = memory();
        let cache = coordinator(vec![l1.clone(), l2.clone()]);
        l2.set("k", v("v"), Some(Duration::from_millis(100))).await;

        cache.get("k").await;
        cache.get("k").await;
        cache.flush().await;
        assert!(l1.contains("k").await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(!l1.contains("k").await);
    }

    #[tokio::test]
    async fn test_promotion_ttl_caps_copy() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let config = CoordinatorConfig {
            promotion_threshold: 1,
            promotion_ttl_secs: Some(1),
            prefetch_enabled: false,
            ..Default::default()
        };
        let cache = CacheCoordinator::new(vec![l1.clone(), l2.clone()], config).unwrap();
        l2.set("forever", v("a"), None).await;
        l2.set("long", v("b"), Some(Duration::from_secs(3_600))).await;

        cache.get("forever").await;
        cache.get("long").await;
        cache.flush().await;

        for key in ["forever", "long"] {
            let (_, left) = l1.get_entry(key).await.unwrap();
            assert!(left.unwrap() <= Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn test_prefetched_copy_keeps_source_ttl() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);
        l2.set("a", v("1"), None).await;
        l2.set("b", v("2"), Some(Duration::from_secs(30))).await;
        cache.add_key_relationship("a", "b");

        cache.get("a").await;
        cache.flush().await;

        let (_, left) = l1.get_entry("b").await.unwrap();
        assert!(left.unwrap() <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_rejected_overwrite_falls_through_to_lower_tier() {
        let l1 = Arc::new(
            MemoryTier::new(crate::config::MemoryTierConfig {
                max_entries: 10,
                max_bytes: 16,
            })
            .unwrap(),
        );
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);

        assert!(cache.set("k", v("old"), None).await);
        let big = Bytes::from(vec![9u8; 32]);
        assert!(!cache.set("k", big.clone(), None).await);
        assert_eq!(cache.get("k").await, Some(big));
    }

    #[tokio::test]
    async fn test_delete_wins_over_pending_promotion() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);
        l2.set("k", v("deep"), None).await;

        cache.get("k").await;
        cache.get("k").await;
        assert!(cache.delete("k").await);
        cache.flush().await;

        assert!(!l1.contains("k").await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_set_wins_over_pending_promotion() {
        let l1 = memory();
        let l2 = CountingTier::new("slow");
        let cache = coordinator(vec![l1.clone(), l2.clone()]);
        l2.set("k", v("old"), None).await;

        cache.get("k").await;
        cache.get("k").await;
        assert!(cache.set("k", v("new"), None).await);
        cache.flush().await;

        assert_eq!(cache.get("k").await, Some(v("new")));
        assert_eq!(l1.get("k").await, Some(v("new")));
    }

    #[test]
    fn test_requires_a_tier() {
        let err = CacheCoordinator::new(Vec::new(), CoordinatorConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
