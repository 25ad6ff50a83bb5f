//! L2: persistent, compressed, TTL-aware disk tier.
//!
//! Layout under the cache directory:
//!
//! ```text
//! <cache_dir>/<blake3(key)>.cache   zstd-compressed payload
//! <cache_dir>/index.sqlite          metadata index (see [`crate::cache::index`])
//! ```
//!
//! Disk caching is an optimization: every read, write or decode failure is
//! logged and degrades to a miss or a failed write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::compressor::Compressor;
use crate::cache::entry::{CacheStats, StatsRecorder};
use crate::cache::index::{EntryMetadata, MetadataIndex, INDEX_FILE};
use crate::cache::tier::{CacheTier, TierKind};
use crate::config::DiskTierConfig;
use crate::error::CacheError;

const BLOB_EXTENSION: &str = "cache";

/// Blob file name for a key.
pub fn blob_name(key: &str) -> String {
    format!("{}.{BLOB_EXTENSION}", blake3::hash(key.as_bytes()).to_hex())
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

/// Whole milliseconds in `d`, saturating at `i64::MAX`.
fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Unix-millisecond expiry for a TTL starting at `now_ms`.
fn expiry_millis(now_ms: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_ms.saturating_add(duration_millis(ttl)))
}

pub struct DiskTier {
    dir: PathBuf,
    index: Arc<Mutex<MetadataIndex>>,
    compressor: Compressor,
    config: DiskTierConfig,
    stats: Arc<StatsRecorder>,
    last_sweep: Mutex<Instant>,
    tmp_seq: AtomicU64,
}

impl DiskTier {
    /// Open (or create) a disk tier rooted at `config.cache_dir`.
    ///
    /// Entries persisted by an earlier instance over the same directory are
    /// visible immediately.
    pub async fn open(config: DiskTierConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let dir = config.cache_dir.clone();
        fs::create_dir_all(&dir).await?;

        let index_path = dir.join(INDEX_FILE);
        let index = tokio::task::spawn_blocking(move || MetadataIndex::open(&index_path)).await??;

        let tier = Self {
            dir,
            index: Arc::new(Mutex::new(index)),
            compressor: Compressor::new(config.compression_level),
            config,
            stats: Arc::new(StatsRecorder::new()),
            last_sweep: Mutex::new(Instant::now()),
            tmp_seq: AtomicU64::new(0),
        };
        tier.mutate(|_| Ok(())).await?;

        let usage = tier.stats.snapshot();
        info!(
            dir = %tier.dir.display(),
            entries = usage.entries,
            bytes = usage.size_bytes,
            "Disk tier opened"
        );
        Ok(tier)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob that would hold `key`.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(blob_name(key))
    }

    /// Index row for `key`, if one exists (expired or not).
    pub async fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        self.metadata_checked(key).await.ok().flatten()
    }

    /// Run a read-only index operation on the blocking pool.
    async fn query<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&MetadataIndex) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let index = self.index.clone();
        tokio::task::spawn_blocking(move || f(&index.lock())).await?
    }

    /// Run a mutating index operation and republish usage statistics.
    ///
    /// Usage is published under the index lock so concurrent writers cannot
    /// leave an older figure behind.
    async fn mutate<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&MetadataIndex) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let index = self.index.clone();
        let stats = self.stats.clone();
        tokio::task::spawn_blocking(move || {
            let index = index.lock();
            let out = f(&index)?;
            let usage = index.usage()?;
            stats.set_usage(usage.entries, usage.bytes);
            Ok::<_, CacheError>(out)
        })
        .await?
    }

    async fn remove_blob(&self, file_name: &str) {
        match fs::remove_file(self.dir.join(file_name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                self.stats.record_error();
                warn!(file = file_name, error = %e, "Failed to remove cache blob");
            }
        }
    }

    /// Drop the row and its blob.
    async fn discard(&self, key: &str) -> Result<bool, CacheError> {
        let owned = key.to_string();
        let file_name = self.mutate(move |idx| idx.remove(&owned)).await?;
        match file_name {
            Some(name) => {
                self.remove_blob(&name).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn fault(&self, op: &str, key: &str, error: &CacheError) {
        self.stats.record_error();
        warn!(tier = %TierKind::Disk, op, key, error = %error, "Disk tier fault");
    }

    async fn read(&self, key: &str) -> Result<Option<(Bytes, Option<Duration>)>, CacheError> {
        let Some(meta) = self.metadata_checked(key).await? else {
            return Ok(None);
        };

        if meta.is_expired(unix_millis()) {
            debug!(key, "Disk entry expired");
            self.discard(key).await?;
            return Ok(None);
        }

        let raw = match fs::read(self.dir.join(&meta.file_name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Metadata without a blob: repair so a later set starts clean.
                self.stats.record_error();
                warn!(key, file = %meta.file_name, "Blob missing, dropping stale metadata");
                let owned = key.to_string();
                self.mutate(move |idx| idx.remove(&owned)).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let data = match self.compressor.decompress(&raw) {
            Ok(data) => data,
            Err(e) => {
                self.stats.record_error();
                warn!(key, error = %e, "Corrupt blob, discarding entry");
                self.discard(key).await?;
                return Ok(None);
            }
        };

        let owned = key.to_string();
        let now = unix_millis();
        self.query(move |idx| idx.touch(&owned, now)).await?;
        let remaining = meta
            .expires_at
            .map(|at| Duration::from_millis(at.saturating_sub(now).max(0) as u64));
        Ok(Some((Bytes::from(data), remaining)))
    }

    async fn metadata_checked(&self, key: &str) -> Result<Option<EntryMetadata>, CacheError> {
        let owned = key.to_string();
        self.query(move |idx| idx.lookup(&owned)).await
    }

    async fn write(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, CacheError> {
        let compressed = self.compressor.compress(value)?;
        let size = compressed.len() as u64;
        if size > self.config.max_bytes {
            debug!(key, size, "Value exceeds disk tier budget");
            // The previous value must not outlive a rejected overwrite.
            self.discard(key).await?;
            return Ok(false);
        }

        let file_name = blob_name(key);
        let path = self.dir.join(&file_name);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!("{file_name}.{seq}.tmp"));

        fs::write(&tmp, &compressed).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let now = unix_millis();
        let meta = EntryMetadata {
            key: key.to_string(),
            file_name,
            size: size as i64,
            created_at: now,
            accessed_at: now,
            expires_at: expiry_millis(now, ttl),
            access_count: 0,
        };
        let max_bytes = self.config.max_bytes;
        let indexed = self
            .mutate(move |idx| {
                idx.upsert(&meta)?;
                idx.evict_over_budget(max_bytes, &meta.key)
            })
            .await;
        let victims = match indexed {
            Ok(victims) => victims,
            Err(e) => {
                // A blob without a row would linger until the next clear.
                let file_name = blob_name(key);
                self.remove_blob(&file_name).await;
                return Err(e);
            }
        };

        if !victims.is_empty() {
            self.stats.record_evictions(victims.len() as u64);
            for (victim, file) in &victims {
                debug!(key = %victim, "Evicted from disk tier");
                self.remove_blob(file).await;
            }
        }

        debug!(key, size, ttl = ?ttl, "Wrote disk entry");
        Ok(true)
    }

    /// Sweep if the cleanup interval has elapsed since the previous sweep.
    async fn maybe_sweep(&self) {
        {
            let mut last = self.last_sweep.lock();
            if last.elapsed() < self.config.cleanup_interval() {
                return;
            }
            *last = Instant::now();
        }
        self.purge_expired().await;
    }

    async fn wipe(&self) -> Result<(), CacheError> {
        let files = self.mutate(|idx| idx.take_all()).await?;
        for file in &files {
            self.remove_blob(file).await;
        }

        // Orphans from interrupted writes or lost index rows.
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stray = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some(BLOB_EXTENSION) | Some("tmp")
            );
            if stray {
                let _ = fs::remove_file(&path).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Disk
    }

    async fn get_entry(&self, key: &str) -> Option<(Bytes, Option<Duration>)> {
        let started = Instant::now();
        match self.read(key).await {
            Ok(value) => {
                self.stats.record_access(value.is_some(), started);
                value
            }
            Err(e) => {
                self.fault("get", key, &e);
                self.stats.record_access(false, started);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let stored = match self.write(key, &value, ttl).await {
            Ok(stored) => stored,
            Err(e) => {
                self.fault("set", key, &e);
                false
            }
        };
        self.maybe_sweep().await;
        stored
    }

    async fn delete(&self, key: &str) -> bool {
        self.discard(key).await.unwrap_or_else(|e| {
            self.fault("delete", key, &e);
            false
        })
    }

    async fn clear(&self) {
        if let Err(e) = self.wipe().await {
            self.fault("clear", "*", &e);
        }
    }

    async fn contains(&self, key: &str) -> bool {
        match self.metadata_checked(key).await {
            Ok(Some(meta)) => !meta.is_expired(unix_millis()),
            Ok(None) => false,
            Err(e) => {
                self.fault("contains", key, &e);
                false
            }
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    async fn purge_expired(&self) -> usize {
        let now = unix_millis();
        let files = match self.mutate(move |idx| idx.take_expired(now)).await {
            Ok(files) => files,
            Err(e) => {
                self.fault("purge_expired", "*", &e);
                return 0;
            }
        };
        for file in &files {
            self.remove_blob(file).await;
        }
        if !files.is_empty() {
            info!(removed = files.len(), "Disk tier expiry sweep");
        }
        files.len()
    }
}
