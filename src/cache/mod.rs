//! In-memory TTL cache with single-flight loading
//!
//! This module provides the caching layer used by request handlers:
//! - TTL expiry: entries are never returned past their expiry instant
//! - Single-flight: concurrent misses on one key run the loader once
//! - Capacity bound: expired entries are purged first, then the entries
//!   closest to expiry are evicted
//!
//! # Example
//!
//! ```rust,ignore
//! use trendcast::cache::{AsyncTtlCache, CacheConfig};
//!
//! let cache = AsyncTtlCache::new(CacheConfig::default());
//!
//! let report = cache
//!     .remember("trends:platform", || async { store.fetch_platform_weekly().await }, None)
//!     .await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::metrics;

/// Shortest TTL an entry can be stored with
pub const MIN_TTL: Duration = Duration::from_millis(100);

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Namespace used in logs and metrics labels
    pub namespace: String,

    /// TTL applied when a caller does not pass one
    pub default_ttl: Duration,

    /// Maximum number of entries kept after a write
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "cache".to_string(),
            default_ttl: Duration::from_secs(60),
            max_entries: 512,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a live entry
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Loader invocations
    pub loads: u64,
    /// Waiters served by a load another caller performed
    pub coalesced: u64,
    /// Loader invocations that returned an error
    pub load_failures: u64,
    /// Entries evicted to respect `max_entries`
    pub evictions: u64,
    /// Expired entries purged
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Entries guarded by the coarse lock
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
}

type KeyLockTable = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// A per-key load lock checked out of the table
///
/// Dropping the lease (including when the owning future is cancelled)
/// removes the table entry if nobody else holds it.
struct KeyLease<'a> {
    table: &'a KeyLockTable,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> KeyLease<'a> {
    fn acquire(table: &'a KeyLockTable, key: &'a str) -> Self {
        let lock = table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { table, key, lock }
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        // Clones are only handed out under the table lock, so a count of two
        // (the table and this lease) means nobody else holds or awaits it.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(self.key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2)
        {
            table.remove(self.key);
        }
    }
}

/// Async TTL cache with stampede protection
pub struct AsyncTtlCache<V> {
    config: CacheConfig,
    inner: Mutex<CacheInner<V>>,
    key_locks: KeyLockTable,
    counters: Counters,
}

impl<V: Clone + Send> AsyncTtlCache<V> {
    /// Create a new cache instance
    pub fn new(config: CacheConfig) -> Self {
        let config = CacheConfig {
            max_entries: config.max_entries.max(1),
            ..config
        };
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
            }),
            key_locks: StdMutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Get config reference
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the value for `key` if it is present and unexpired
    pub async fn get(&self, key: &str) -> Option<V> {
        let value = self.lookup(key).await;
        self.record_lookup(value.is_some());
        value
    }

    /// Store `value` for `key` with the given or default TTL
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl).max(MIN_TTL);
        let expires_at = Instant::now() + ttl;

        let mut inner = self.inner.lock().await;
        inner
            .entries
            .insert(key.into(), CacheEntry { value, expires_at });
        self.prune_locked(&mut inner);
    }

    /// Return the cached value, or run `loader` once and cache its result
    ///
    /// Concurrent callers that miss on the same key wait for a single loader
    /// invocation and all receive its value. A loader error is returned to
    /// the caller that ran it and nothing is stored; waiters then retry the
    /// load themselves, one at a time.
    pub async fn remember<F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(key).await {
            self.record_lookup(true);
            return Ok(value);
        }
        self.record_lookup(false);

        let lease = KeyLease::acquire(&self.key_locks, key);
        let _flight = lease.lock.lock().await;
        self.load_once(key, loader, ttl).await
    }

    /// Remove one entry, returning whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.lock().await.entries.remove(key).is_some()
    }

    /// Remove every entry
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let cleared = inner.entries.len();
        inner.entries.clear();
        tracing::debug!(namespace = %self.config.namespace, cleared, "Cache cleared");
    }

    /// Number of stored entries, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of per-key locks currently tracked
    pub async fn key_lock_count(&self) -> usize {
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_once<F, Fut, E>(&self, key: &str, loader: F, ttl: Option<Duration>) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Another caller may have filled the entry while we waited
        if let Some(value) = self.lookup(key).await {
            Counters::bump(&self.counters.coalesced, 1);
            return Ok(value);
        }

        Counters::bump(&self.counters.loads, 1);
        tracing::debug!(namespace = %self.config.namespace, key, "Cache miss, loading");

        let loaded = {
            let _timer = metrics::start_loader_timer(&self.config.namespace);
            loader().await
        };

        match loaded {
            Ok(value) => {
                self.set(key, value.clone(), ttl).await;
                Ok(value)
            }
            Err(e) => {
                Counters::bump(&self.counters.load_failures, 1);
                metrics::record_cache_load_failure(&self.config.namespace);
                Err(e)
            }
        }
    }

    /// Read without touching hit/miss statistics, purging an expired entry
    async fn lookup(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                Counters::bump(&self.counters.expirations, 1);
                None
            }
            None => None,
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            Counters::bump(&self.counters.hits, 1);
        } else {
            Counters::bump(&self.counters.misses, 1);
        }
        metrics::record_cache_lookup(&self.config.namespace, hit);
    }

    fn prune_locked(&self, inner: &mut CacheInner<V>) {
        if inner.entries.len() <= self.config.max_entries {
            return;
        }

        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let expired = (before - inner.entries.len()) as u64;
        Counters::bump(&self.counters.expirations, expired);

        let mut evicted = 0u64;
        while inner.entries.len() > self.config.max_entries {
            let soonest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());

            match soonest {
                Some(key) => {
                    inner.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            Counters::bump(&self.counters.evictions, evicted);
            metrics::record_cache_evictions(&self.config.namespace, evicted);
            tracing::debug!(
                namespace = %self.config.namespace,
                expired,
                evicted,
                "Cache over capacity, evicted soonest-expiring entries"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_entries: usize) -> AsyncTtlCache<u32> {
        AsyncTtlCache::new(CacheConfig {
            namespace: "test".to_string(),
            default_ttl: Duration::from_secs(30),
            max_entries,
        })
    }

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.max_entries, 512);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.hits = 75;
        stats.misses = 25;
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_zero_capacity_is_floored() {
        let cache = small_cache(0);
        assert_eq!(cache.config().max_entries, 1);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = small_cache(8);
        cache.set("a", 1, None).await;

        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("b").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_purged_on_access() {
        let cache = small_cache(8);
        cache.set("a", 1, Some(Duration::from_secs(5))).await;

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_floor() {
        let cache = small_cache(8);
        cache.set("a", 1, Some(Duration::ZERO)).await;
        assert_eq!(cache.get("a").await, Some(1));

        tokio::time::advance(MIN_TTL).await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_prefers_expired_then_soonest() {
        let cache = small_cache(2);
        cache.set("short", 1, Some(Duration::from_secs(1))).await;
        cache.set("long", 2, Some(Duration::from_secs(100))).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        // "short" is expired and goes first; "mid" then fits
        cache.set("mid", 3, Some(Duration::from_secs(50))).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.stats().evictions, 0);

        // Over budget with no expired entries: soonest expiry ("mid") is evicted
        cache.set("longest", 4, Some(Duration::from_secs(200))).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("mid").await, None);
        assert_eq!(cache.get("long").await, Some(2));
        assert_eq!(cache.get("longest").await, Some(4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_remember_caches_value() {
        let cache = small_cache(8);

        let first: Result<u32, ()> = cache.remember("k", || async { Ok(7) }, None).await;
        let second: Result<u32, ()> = cache.remember("k", || async { Ok(99) }, None).await;

        assert_eq!(first, Ok(7));
        assert_eq!(second, Ok(7));
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test]
    async fn test_remember_failure_stores_nothing() {
        let cache = small_cache(8);

        let result: Result<u32, String> = cache
            .remember("k", || async { Err("boom".to_string()) }, None)
            .await;

        assert_eq!(result, Err("boom".to_string()));
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().load_failures, 1);
    }

    #[tokio::test]
    async fn test_key_lock_released_after_load() {
        let cache = small_cache(8);
        let _: Result<u32, ()> = cache.remember("k", || async { Ok(1) }, None).await;
        assert_eq!(cache.key_lock_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_lock_released_when_remember_cancelled() {
        let cache = small_cache(8);

        let pending = cache.remember(
            "slow",
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<u32, ()>(1)
            },
            None,
        );
        let timed_out = tokio::time::timeout(Duration::from_secs(1), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(cache.key_lock_count().await, 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = small_cache(8);
        cache.set("a", 1, None).await;
        cache.set("b", 2, None).await;

        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
