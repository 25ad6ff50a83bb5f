//! L3: optional distributed tier.
//!
//! A thin adapter over a [`KvBackend`]. All keys are stored as
//! `<namespace>:<key>` so that `clear` only ever touches this namespace.
//!
//! The tier never raises into the coordinator. If the backend is unreachable
//! at construction, or any call fails or exceeds `op_timeout`, the tier
//! disables itself: `get` misses and `set`/`delete` report `false` until
//! [`DistributedTier::reconnect`] succeeds.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::backend::{KvBackend, RedisBackend};
use crate::cache::entry::{CacheStats, StatsRecorder};
use crate::cache::tier::{CacheTier, TierKind};
use crate::config::DistributedTierConfig;
use crate::error::CacheError;

pub struct DistributedTier {
    backend: RwLock<Option<Arc<dyn KvBackend>>>,
    config: DistributedTierConfig,
    enabled: AtomicBool,
    stats: StatsRecorder,
}

impl DistributedTier {
    /// Connect to the Redis server named by `config.url`.
    ///
    /// Only invalid configuration is an error; an unreachable server yields a
    /// disabled tier.
    pub async fn connect(config: DistributedTierConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let backend = match Self::open_redis(&config).await {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!(url = %config.url, error = %e, "Distributed tier unreachable, starting disabled");
                None
            }
        };
        let enabled = backend.is_some();
        Ok(Self::assemble(backend, config, enabled))
    }

    /// Wrap an already constructed backend. The backend is pinged once.
    pub async fn with_backend(
        backend: Arc<dyn KvBackend>,
        config: DistributedTierConfig,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let timeout = config.op_timeout();
        let reachable = match tokio::time::timeout(timeout, backend.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Distributed backend ping failed, starting disabled");
                false
            }
            Err(_) => {
                warn!(?timeout, "Distributed backend ping timed out, starting disabled");
                false
            }
        };
        Ok(Self::assemble(Some(backend), config, reachable))
    }

    fn assemble(
        backend: Option<Arc<dyn KvBackend>>,
        config: DistributedTierConfig,
        enabled: bool,
    ) -> Self {
        Self {
            backend: RwLock::new(backend),
            config,
            enabled: AtomicBool::new(enabled),
            stats: StatsRecorder::new(),
        }
    }

    async fn open_redis(config: &DistributedTierConfig) -> Result<Arc<dyn KvBackend>, CacheError> {
        let timeout = config.op_timeout();
        let backend = tokio::time::timeout(timeout, RedisBackend::connect(&config.url))
            .await
            .map_err(|_| CacheError::Timeout(timeout))??;
        Ok(Arc::new(backend))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Try to bring a disabled tier back. Returns whether the tier is enabled.
    pub async fn reconnect(&self) -> bool {
        if self.is_enabled() {
            return true;
        }

        let existing = self.backend.read().clone();
        let backend = match existing {
            Some(backend) => backend,
            None => match Self::open_redis(&self.config).await {
                Ok(backend) => {
                    *self.backend.write() = Some(backend.clone());
                    backend
                }
                Err(e) => {
                    debug!(error = %e, "Distributed tier still unreachable");
                    return false;
                }
            },
        };

        let timeout = self.config.op_timeout();
        match tokio::time::timeout(timeout, backend.ping()).await {
            Ok(Ok(())) => {
                self.enabled.store(true, Ordering::Relaxed);
                info!(namespace = %self.config.namespace, "Distributed tier re-enabled");
                true
            }
            _ => false,
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.config.namespace)
    }

    fn active_backend(&self) -> Option<Arc<dyn KvBackend>> {
        if !self.is_enabled() {
            return None;
        }
        self.backend.read().clone()
    }

    /// Run one backend call under the configured timeout. Any failure
    /// disables the tier.
    async fn call<T>(
        &self,
        op: &str,
        key: &str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Option<T> {
        let timeout = self.config.op_timeout();
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats.record_error();
                if self.enabled.swap(false, Ordering::Relaxed) {
                    warn!(
                        tier = %TierKind::Distributed,
                        op,
                        key,
                        error = %e,
                        "Distributed tier disabled after backend failure"
                    );
                }
                None
            }
        }
    }
}

#[async_trait]
impl CacheTier for DistributedTier {
    fn kind(&self) -> TierKind {
        TierKind::Distributed
    }

    async fn get_entry(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        let started = Instant::now();
        let hit = match self.active_backend() {
            Some(backend) => {
                let full = self.namespaced(key);
                self.call("get", key, backend.get_entry(&full)).await.flatten()
            }
            None => None,
        };
        self.stats.record_access(hit.is_some(), started);
        hit.map(|(value, remaining)| (Bytes::from(value), remaining))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let Some(backend) = self.active_backend() else {
            return false;
        };
        let full = self.namespaced(key);
        self.call("set", key, backend.set(&full, &value, ttl))
            .await
            .is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(backend) = self.active_backend() else {
            return false;
        };
        let full = self.namespaced(key);
        self.call("delete", key, backend.delete(&full))
            .await
            .unwrap_or(false)
    }

    async fn clear(&self) {
        let Some(backend) = self.active_backend() else {
            return;
        };
        let prefix = self.namespaced("");
        let Some(keys) = self.call("clear", &prefix, backend.scan_prefix(&prefix)).await else {
            return;
        };

        let mut removed = 0;
        for batch in keys.chunks(self.config.delete_batch) {
            match self.call("clear", &prefix, backend.delete_many(batch)).await {
                Some(count) => removed += count,
                None => return,
            }
        }
        info!(namespace = %self.config.namespace, removed, "Cleared distributed namespace");
    }

    async fn contains(&self, key: &str) -> bool {
        let Some(backend) = self.active_backend() else {
            return false;
        };
        let full = self.namespaced(key);
        self.call("contains", key, backend.exists(&full))
            .await
            .unwrap_or(false)
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
