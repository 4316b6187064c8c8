//! Generic TTL cache with lazy and periodic eviction.
//!
//! Reads take a shared lock and never block each other; every mutation
//! (`set`, `delete`, `clear`, lazy eviction, sweeping) takes the exclusive
//! lock. `parking_lot::RwLock` is eventually fair, so a steady stream of
//! readers cannot starve writers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Cached value with its absolute expiry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        ratekeeper_common::is_expired_at(self.expires_at, now)
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub key_count: usize,
}

struct CacheInner<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    // Keys seen expired by readers, removed on the next exclusive pass.
    pending_evictions: Mutex<HashSet<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> CacheInner<V> {
    fn take_pending(&self) -> Vec<String> {
        let mut pending = self.pending_evictions.lock();
        pending.drain().collect()
    }

    fn purge_locked(
        entries: &mut HashMap<String, CacheEntry<V>>,
        keys: Vec<String>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut removed = 0;
        for key in keys {
            // The key may have been rewritten since it was queued
            if entries.get(&key).is_some_and(|e| e.is_expired_at(now)) {
                entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    fn purge_pending(&self) -> usize {
        let keys = self.take_pending();
        if keys.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write();
        Self::purge_locked(&mut *entries, keys, Utc::now())
    }
}

/// Thread-safe key/value cache with per-entry TTL.
///
/// Cloning is cheap and yields a handle to the same storage.
pub struct TtlCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                pending_evictions: Mutex::new(HashSet::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any existing entry.
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> FxResult<()> {
        validate_key(key)?;
        if ttl <= Duration::zero() {
            return Err(FxError::InvalidTtl(ttl.num_milliseconds()));
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(FxError::InvalidTtl(ttl.num_milliseconds()))?;

        let pending = self.inner.take_pending();
        let mut entries = self.inner.entries.write();
        CacheInner::<V>::purge_locked(&mut *entries, pending, now);
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    /// Get a value if present and not expired.
    ///
    /// An expired entry counts as a miss and is queued for removal; the call
    /// does not wait for the removal.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Utc::now();
        let found = {
            let entries = self.inner.entries.read();
            let found = entries
                .get(key)
                .map(|entry| (!entry.is_expired_at(now)).then(|| entry.value.clone()));
            found
        };

        match found {
            Some(Some(value)) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                Some(value)
            }
            Some(None) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache entry expired");
                self.schedule_eviction(key);
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache miss");
                None
            }
        }
    }

    /// Remove an entry. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) {
        let pending = self.inner.take_pending();
        let mut entries = self.inner.entries.write();
        CacheInner::<V>::purge_locked(&mut *entries, pending, Utc::now());
        if entries.remove(key).is_some() {
            debug!(key, "Cache entry invalidated");
        }
    }

    /// Check for a live entry without touching hit/miss counters.
    pub fn exists(&self, key: &str) -> bool {
        let now = Utc::now();
        let expired = {
            let entries = self.inner.entries.read();
            let expired = entries.get(key).map(|entry| entry.is_expired_at(now));
            expired
        };

        match expired {
            Some(false) => true,
            Some(true) => {
                self.schedule_eviction(key);
                false
            }
            None => false,
        }
    }

    /// Remove every entry and reset hit/miss counters.
    pub fn clear(&self) {
        let mut entries = self.inner.entries.write();
        entries.clear();
        self.inner.pending_evictions.lock().clear();
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let key_count = self.inner.entries.read().len();
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            key_count,
        }
    }

    /// Get the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.inner.entries.write();
        self.inner.pending_evictions.lock().clear();

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    /// Run `sweep` every `period` until `shutdown` flips to true or its
    /// sender is dropped.
    pub fn spawn_sweeper(
        &self,
        period: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "Swept expired cache entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Cache sweeper stopped");
        })
    }

    fn schedule_eviction(&self, key: &str) {
        self.inner
            .pending_evictions
            .lock()
            .insert(key.to_string());

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move {
                inner.purge_pending();
            });
        }
    }
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn validate_key(key: &str) -> FxResult<()> {
    if key.trim().is_empty() {
        return Err(FxError::InvalidKey(key.to_string()));
    }
    Ok(())
}
