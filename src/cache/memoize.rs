//! Memoization on top of the cache hierarchy.
//!
//! Producers never build keys themselves. A key is derived from the
//! operation name and a canonical JSON encoding of the arguments:
//!
//! ```text
//! <operation>:<blake3(operation || 0x00 || canonical_json(args))>
//! ```
//!
//! Cache faults never reach the caller. If arguments cannot be encoded the
//! call runs uncached; an undecodable cached value is dropped and recomputed.
//! Errors from the computation itself are returned and never cached.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::coordinator::CacheCoordinator;
use crate::config::MemoizeConfig;
use crate::error::CacheError;

/// Content-addressed key for `operation` applied to `args`.
///
/// Object keys are sorted before hashing, so two maps with the same
/// contents produce the same key regardless of insertion order.
pub fn cache_key<A: Serialize + ?Sized>(operation: &str, args: &A) -> Result<String, CacheError> {
    let canonical = canonicalize(serde_json::to_value(args)?);
    let encoded = serde_json::to_vec(&canonical)?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(operation.as_bytes());
    hasher.update(&[0]);
    hasher.update(&encoded);
    Ok(format!("{operation}:{}", hasher.finalize().to_hex()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Get-or-compute over a [`CacheCoordinator`].
#[derive(Clone)]
pub struct Memoizer {
    cache: CacheCoordinator,
    ttl: Option<Duration>,
}

impl Memoizer {
    pub fn new(cache: CacheCoordinator, ttl: Option<Duration>) -> Self {
        Self { cache, ttl }
    }

    pub fn from_config(cache: CacheCoordinator, config: &MemoizeConfig) -> Self {
        Self::new(cache, config.default_ttl())
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Return the cached result of `operation(args)`, or run `compute` and
    /// cache what it returns.
    pub async fn get_or_compute<A, T, E, F, Fut>(
        &self,
        operation: &str,
        args: &A,
        compute: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key_for(operation, args);
        self.resolve(key, compute).await
    }

    fn key_for<A: Serialize + ?Sized>(&self, operation: &str, args: &A) -> Option<String> {
        match cache_key(operation, args) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(operation, error = %e, "Arguments not encodable, calling uncached");
                None
            }
        }
    }

    async fn resolve<T, E, F, Fut>(&self, key: Option<String>, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(key) = key else {
            return compute().await;
        };

        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_slice::<T>(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value undecodable, recomputing");
                    self.cache.delete(&key).await;
                }
            }
        }

        let value = compute().await?;
        match serde_json::to_vec(&value) {
            Ok(encoded) => {
                if !self.cache.set(&key, Bytes::from(encoded), self.ttl).await {
                    debug!(key = %key, "Memoized value not stored in every tier");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Result not encodable, not cached"),
        }
        Ok(value)
    }
}

/// A function whose results are cached under its operation name.
pub struct Memoized<F> {
    memoizer: Memoizer,
    operation: String,
    func: F,
}

/// Wrap `func` so that calls with equal arguments are served from
/// `hierarchy` for `ttl`.
pub fn cached<F>(
    ttl: Option<Duration>,
    hierarchy: CacheCoordinator,
    operation: impl Into<String>,
    func: F,
) -> Memoized<F> {
    Memoized {
        memoizer: Memoizer::new(hierarchy, ttl),
        operation: operation.into(),
        func,
    }
}

impl<F> Memoized<F> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        A: Serialize,
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.memoizer.key_for(&self.operation, &args);
        self.memoizer.resolve(key, || (self.func)(args)).await
    }
}
