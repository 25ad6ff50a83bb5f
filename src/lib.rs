//! cache-hierarchy: a multi-tier cache for expensive computed artifacts.
//!
//! Values flow through a hierarchy of storage tiers, fastest first:
//!   memory LRU (hot) → compressed disk store (warm) → Redis (cold, shared)
//!
//! Producers use the [`cache::CacheCoordinator`] directly or through the
//! memoization wrapper in [`cache::memoize`].

pub mod cache;
pub mod config;
pub mod error;
pub mod server;

pub use cache::{CacheCoordinator, CacheStats, CacheTier, TierKind};
pub use config::Config;
pub use error::{CacheError, ErrorKind};
