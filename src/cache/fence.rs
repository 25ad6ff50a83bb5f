//! Ordering between foreground writes and background copies.
//!
//! Promotion and prefetch copy a value read from a slower tier into faster
//! ones after the read returned. Without coordination such a copy can land
//! after a `set` or `delete` of the same key and shadow the newer state.
//!
//! Keys hash onto a fixed set of stripes. Each stripe has an async RwLock and
//! a write epoch:
//! - foreground writes hold the stripe shared and bump the epoch on release
//! - a background copy takes the stripe exclusively and only proceeds if the
//!   epoch still matches the one it saw before reading the source tier

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stripe count. Power of two so the index is a mask.
pub const FENCE_STRIPES: usize = 64;

#[derive(Default)]
struct Stripe {
    lock: RwLock<()>,
    epoch: AtomicU64,
}

pub struct WriteFence {
    stripes: Box<[Stripe]>,
    hasher: RandomState,
}

/// Held by a foreground write for its whole fan-out.
pub struct WriteGuard<'a> {
    stripe: &'a Stripe,
    _shared: RwLockReadGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // Runs before the shared lock is released.
        self.stripe.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for WriteFence {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteFence {
    pub fn new() -> Self {
        Self {
            stripes: (0..FENCE_STRIPES).map(|_| Stripe::default()).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe(&self, key: &str) -> &Stripe {
        let hash = self.hasher.hash_one(key) as usize;
        &self.stripes[hash & (FENCE_STRIPES - 1)]
    }

    /// Epoch to capture before reading a value that may be copied later.
    pub fn token(&self, key: &str) -> u64 {
        self.stripe(key).epoch.load(Ordering::SeqCst)
    }

    /// Enter a foreground write of `key`.
    pub async fn write(&self, key: &str) -> WriteGuard<'_> {
        let stripe = self.stripe(key);
        WriteGuard {
            stripe,
            _shared: stripe.lock.read().await,
        }
    }

    /// Enter a write that touches every key, such as a clear.
    pub async fn write_all(&self) -> Vec<WriteGuard<'_>> {
        let mut guards = Vec::with_capacity(self.stripes.len());
        for stripe in self.stripes.iter() {
            guards.push(WriteGuard {
                stripe,
                _shared: stripe.lock.read().await,
            });
        }
        guards
    }

    /// Exclusive access for a background copy of `key`, granted only if no
    /// write to its stripe completed since `token` was taken. Writes still
    /// in flight are waited out first.
    pub async fn copy_guard(&self, key: &str, token: u64) -> Option<RwLockWriteGuard<'_, ()>> {
        let stripe = self.stripe(key);
        let guard = stripe.lock.write().await;
        (stripe.epoch.load(Ordering::SeqCst) == token).then_some(guard)
    }
}
