//! Cache entry bookkeeping and per-tier statistics.
//!
//! An entry is the unit stored by the in-memory tier; the disk tier keeps the
//! same bookkeeping as rows in its metadata index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;

/// Smoothing factor for the access latency moving average.
pub const LATENCY_EMA_ALPHA: f64 = 0.1;

/// A cached payload plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized payload.
    pub value: Bytes,

    /// Estimated size in bytes.
    pub size: usize,

    /// When the entry was written.
    pub created_at: Instant,

    /// Timestamp of last access.
    pub last_access: Instant,

    /// Number of times this entry has been read.
    pub access_count: u64,

    /// Absolute expiry, if a TTL was given.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            size: estimate_size(&value),
            value,
            created_at: now,
            last_access: now,
            access_count: 0,
            expires_at: expiry_after(now, ttl),
        }
    }

    /// Lifetime left at `now`. `None` means the entry never expires.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Record an access, updating timestamp and counter.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
        self.access_count += 1;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Absolute expiry for a TTL starting at `now`.
///
/// A TTL too large to represent as an `Instant` is treated as no expiry.
pub fn expiry_after(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| now.checked_add(ttl))
}

/// Estimated in-memory footprint of a payload.
///
/// Payloads reach the hierarchy already encoded, so blobs, text and packed
/// numeric vectors are all measured by their encoded length.
pub fn estimate_size(value: &Bytes) -> usize {
    value.len()
}

/// Read-only statistics snapshot for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Storage faults absorbed by the tier.
    pub errors: u64,
    pub size_bytes: u64,
    pub entries: u64,
    /// Exponential moving average of access latency, in microseconds.
    pub avg_access_latency_us: f64,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Lock-free counters backing a [`CacheStats`] snapshot.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    size_bytes: AtomicU64,
    entries: AtomicU64,
    /// f64 bit pattern of the latency EMA.
    latency_us: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup outcome and fold its latency into the moving average.
    pub fn record_access(&self, hit: bool, started: Instant) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.update_latency(started.elapsed());
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the tier's current footprint.
    pub fn set_usage(&self, entries: u64, size_bytes: u64) {
        self.entries.store(entries, Ordering::Relaxed);
        self.size_bytes.store(size_bytes, Ordering::Relaxed);
    }

    fn update_latency(&self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1e6;
        let _ = self
            .latency_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = if current == 0.0 {
                    sample
                } else {
                    LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * current
                };
                Some(next.to_bits())
            });
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            avg_access_latency_us: f64::from_bits(self.latency_us.load(Ordering::Relaxed)),
        }
    }
}
