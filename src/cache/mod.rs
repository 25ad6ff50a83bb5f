//! Multi-tier cache hierarchy.
//!
//! This module contains the tiers and the machinery that ties them together:
//! - [`tier`]: the `CacheTier` contract and tier identities
//! - [`entry`]: entry bookkeeping and per-tier statistics
//! - [`lru`]: slot-table LRU index used by the memory tier
//! - [`memory`]: L1, bounded in-process LRU
//! - [`disk`]: L2, zstd-compressed files plus a SQLite [`index`]
//! - [`distributed`]: L3, namespaced adapter over a networked [`backend`]
//! - [`coordinator`]: lookup fan-out, promotion, prefetch, fan-out writes
//! - [`fence`]: keeps background copies from overwriting newer writes
//! - [`prefetcher`]: relationship graph and related-key heuristics
//! - [`memoize`]: content-addressed get-or-compute wrapper
//! - [`compressor`]: zstd compression/decompression

pub mod backend;
pub mod compressor;
pub mod coordinator;
pub mod disk;
pub mod distributed;
pub mod entry;
pub mod fence;
pub mod index;
pub mod lru;
pub mod memoize;
pub mod memory;
pub mod prefetcher;
pub mod tier;

pub use coordinator::{CacheCoordinator, HierarchyStats};
pub use entry::CacheStats;
pub use memoize::{cache_key, cached, Memoized, Memoizer};
pub use tier::{CacheTier, TierKind};
