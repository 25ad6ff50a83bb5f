//! Key-value services that can back the distributed tier.
//!
//! - [`RedisBackend`]: any Redis-compatible server, via a multiplexed
//!   `ConnectionManager`. Key iteration uses `SCAN`, never `KEYS`.
//! - [`InMemoryBackend`]: process-local map with native TTL, for single-node
//!   deployments and tests. It can be switched offline to simulate outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::CacheError;

/// Keys fetched per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Longest expiry handed to the server. Redis rejects `PX` values whose
/// deadline overflows its clock; longer TTLs are stored without expiry.
const MAX_EXPIRE_MILLIS: u64 = i64::MAX as u64 / 2;

/// `PX` argument for a TTL, or `None` when it is too long to express.
fn expire_millis(ttl: Duration) -> Option<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|ms| *ms <= MAX_EXPIRE_MILLIS)
        .map(|ms| ms.max(1))
}

/// Raw operations the distributed tier needs from a networked store.
///
/// Keys passed here are already namespaced.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn ping(&self) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Value plus remaining lifetime (`None` when the key never expires).
    async fn get_entry(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Option<Duration>)>, CacheError>;

    /// Store a value, using the service's native expiry when `ttl` is given.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Every key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Delete a batch of keys in one round trip. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError>;
}

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        debug!(url, "Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn get_entry(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Option<Duration>)>, CacheError> {
        let mut conn = self.conn.clone();
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        // PTTL is -1 for a key without expiry and -2 for a missing key.
        let remaining = u64::try_from(pttl).ok().map(Duration::from_millis);
        Ok(value.map(|value| (value, remaining)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ms) = ttl.and_then(expire_millis) {
            cmd.arg("PX").arg(ms);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let found: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let removed: u64 = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }
}

/// In-process backend with TTL support.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
    offline: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails while offline.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::Relaxed);
    }

    /// Live (unexpired) keys, regardless of namespace.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, (_, expires))| !expires.is_some_and(|at| now >= at))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(CacheError::Network("backend offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn ping(&self) -> Result<(), CacheError> {
        self.check_online()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.get_entry(key).await?.map(|(value, _)| value))
    }

    async fn get_entry(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Option<Duration>)>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some((_, expires)) => expires.is_some_and(|at| now >= at),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, expires)| {
            let remaining = expires.map(|at| at.saturating_duration_since(now));
            (value.clone(), remaining)
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check_online()?;
        let expires = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_vec(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_online()?;
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.check_online()?;
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check_online()?;
        let mut entries = self.entries.lock();
        Ok(keys.iter().filter(|key| entries.remove(*key).is_some()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let backend = InMemoryBackend::new();
        backend.set("ns:a", b"1", None).await.unwrap();
        assert_eq!(backend.get("ns:a").await.unwrap(), Some(b"1".to_vec()));
        assert!(backend.exists("ns:a").await.unwrap());
        assert!(backend.delete("ns:a").await.unwrap());
        assert!(!backend.delete("ns:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_native_ttl() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_huge_ttl() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"v", Some(Duration::MAX)).await.unwrap();
        assert_eq!(backend.get_entry("k").await.unwrap(), Some((b"v".to_vec(), None)));

        backend
            .set("t", b"v", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let (_, left) = backend.get_entry("t").await.unwrap().unwrap();
        assert!(left.unwrap() > Duration::from_secs(59));
    }

    #[test]
    fn test_expire_millis_clamps() {
        assert_eq!(expire_millis(Duration::from_micros(10)), Some(1));
        assert_eq!(expire_millis(Duration::from_secs(2)), Some(2_000));
        assert_eq!(expire_millis(Duration::MAX), None);
        assert_eq!(expire_millis(Duration::from_secs(u64::MAX / 1_000)), None);
    }

    #[tokio::test]
    async fn test_scan_and_delete_many() {
        let backend = InMemoryBackend::new();
        for key in ["ns:a", "ns:b", "other:a"] {
            backend.set(key, b"v", None).await.unwrap();
        }
        let mut found = backend.scan_prefix("ns:").await.unwrap();
        found.sort();
        assert_eq!(found, vec!["ns:a", "ns:b"]);

        assert_eq!(backend.delete_many(&found).await.unwrap(), 2);
        assert_eq!(backend.keys(), vec!["other:a"]);
    }

    #[tokio::test]
    async fn test_offline_fails() {
        let backend = InMemoryBackend::new();
        backend.set_online(false);
        assert!(backend.ping().await.is_err());
        assert!(backend.get("k").await.is_err());
        backend.set_online(true);
        assert!(backend.ping().await.is_ok());
    }
}
