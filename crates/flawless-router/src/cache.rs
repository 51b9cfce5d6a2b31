//! Bounded LRU cache of resolved routes.
//!
//! The cache maps `(method, normalized path)` to a [`RouteMatch`] so hot paths
//! skip the trie walk. Recency is strict LRU: a `lookup` hit or an `insert`
//! makes the key most recent, and overflow evicts the least recent key.
//!
//! # Coherence
//!
//! Every [`RouteCache::invalidate_all`] advances an epoch while holding the
//! cache lock. Writers that resolved against a table snapshot read the epoch
//! *before* loading the snapshot and insert with
//! [`RouteCache::insert_if_current`], which refuses the entry if an
//! invalidation happened in between. A hit is therefore always a match the
//! current table would produce.

use crate::route::RouteMatch;
use http::Method;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of cached resolutions.
pub const DEFAULT_CACHE_CAPACITY: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    method: Method,
    path: Box<str>,
}

/// A cached resolution.
pub struct CacheEntry<E> {
    /// The resolved match.
    pub matched: RouteMatch<E>,
    /// When the entry was inserted.
    pub inserted_at: Instant,
}

impl<E> Clone for CacheEntry<E> {
    fn clone(&self) -> Self {
        Self {
            matched: self.matched.clone(),
            inserted_at: self.inserted_at,
        }
    }
}

impl<E> std::fmt::Debug for CacheEntry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("matched", &self.matched)
            .field("inserted_at", &self.inserted_at)
            .finish()
    }
}

/// Route cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: NonZeroUsize,
    /// Optional time-to-live per entry.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ttl: None,
        }
    }
}

impl CacheConfig {
    /// Creates a config with the given capacity and no TTL.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ttl: None,
        }
    }

    /// Sets the entry time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed, including expired entries.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Calls to `invalidate_all`.
    pub invalidations: u64,
    /// Current number of entries.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl CacheStats {
    /// Returns the hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe LRU cache of route resolutions.
pub struct RouteCache<E> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<E>>>,
    ttl: Option<Duration>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl<E> RouteCache<E> {
    /// Creates a cache from a config.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.capacity)),
            ttl: config.ttl,
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(CacheConfig::with_capacity(capacity))
    }

    /// Looks up a resolution and marks it most recently used.
    ///
    /// Expired entries are removed and reported as misses.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<CacheEntry<E>> {
        let key = CacheKey {
            method: method.clone(),
            path: path.into(),
        };
        let mut entries = self.entries.lock();

        let expired = match entries.get(&key) {
            Some(entry) if !self.is_expired(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts or overwrites a resolution and marks it most recently used.
    pub fn insert(&self, method: Method, path: &str, matched: RouteMatch<E>) {
        let mut entries = self.entries.lock();
        self.put(&mut entries, method, path, matched);
    }

    /// Inserts only if no invalidation happened since `epoch` was read.
    ///
    /// Returns whether the entry was stored.
    pub fn insert_if_current(
        &self,
        epoch: u64,
        method: Method,
        path: &str,
        matched: RouteMatch<E>,
    ) -> bool {
        let mut entries = self.entries.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!(route = %matched.route.pattern(), "skipping stale cache insert");
            return false;
        }
        self.put(&mut entries, method, path, matched);
        true
    }

    fn put(
        &self,
        entries: &mut LruCache<CacheKey, CacheEntry<E>>,
        method: Method,
        path: &str,
        matched: RouteMatch<E>,
    ) {
        let key = CacheKey {
            method,
            path: path.into(),
        };
        let entry = CacheEntry {
            matched,
            inserted_at: Instant::now(),
        };
        if let Some((old_key, _)) = entries.push(key.clone(), entry) {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drops every entry. No entry inserted before this call is returned
    /// by a later `lookup`.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current invalidation epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry<E>) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.inserted_at.elapsed() > ttl)
    }
}

impl<E> Default for RouteCache<E> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<E> std::fmt::Debug for RouteCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteCache")
            .field("stats", &self.stats())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RouteTable;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn table() -> RouteTable<&'static str> {
        let mut table = RouteTable::new();
        table.register(Method::GET, "/users/{id}", "getUser").unwrap();
        table.register(Method::GET, "/static/*", "assets").unwrap();
        table
    }

    fn resolve(table: &RouteTable<&'static str>, path: &str) -> RouteMatch<&'static str> {
        table.resolve_path(&Method::GET, path).unwrap()
    }

    #[test]
    fn test_miss_then_hit() {
        let table = table();
        let cache = RouteCache::with_capacity(4);

        assert!(cache.lookup(&Method::GET, "/users/1").is_none());
        cache.insert(Method::GET, "/users/1", resolve(&table, "/users/1"));

        let entry = cache.lookup(&Method::GET, "/users/1").unwrap();
        assert_eq!(entry.matched.params.get("id"), Some("1"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_method_is_part_of_key() {
        let table = table();
        let cache = RouteCache::with_capacity(4);
        cache.insert(Method::GET, "/users/1", resolve(&table, "/users/1"));

        assert!(cache.lookup(&Method::HEAD, "/users/1").is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let table = table();
        let cache = RouteCache::with_capacity(2);
        cache.insert(Method::GET, "/users/1", resolve(&table, "/users/1"));
        cache.insert(Method::GET, "/users/2", resolve(&table, "/users/2"));

        // Touch /users/1 so /users/2 becomes least recent.
        assert!(cache.lookup(&Method::GET, "/users/1").is_some());
        cache.insert(Method::GET, "/users/3", resolve(&table, "/users/3"));

        assert!(cache.lookup(&Method::GET, "/users/2").is_none());
        assert!(cache.lookup(&Method::GET, "/users/1").is_some());
        assert!(cache.lookup(&Method::GET, "/users/3").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_insert_overwrites_and_refreshes() {
        let table = table();
        let cache = RouteCache::with_capacity(2);
        cache.insert(Method::GET, "/users/1", resolve(&table, "/users/1"));
        cache.insert(Method::GET, "/users/2", resolve(&table, "/users/2"));
        cache.insert(Method::GET, "/users/1", resolve(&table, "/users/1"));
        cache.insert(Method::GET, "/users/3", resolve(&table, "/users/3"));

        assert!(cache.lookup(&Method::GET, "/users/1").is_some());
        assert!(cache.lookup(&Method::GET, "/users/2").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_all() {
        let table = table();
        let cache = RouteCache::with_capacity(4);
        cache.insert(Method::GET, "/users/1", resolve(&table, "/users/1"));

        let epoch = cache.epoch();
        cache.invalidate_all();

        assert!(cache.is_empty());
        assert!(cache.lookup(&Method::GET, "/users/1").is_none());
        assert_eq!(cache.epoch(), epoch + 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_stale_insert_rejected_after_invalidation() {
        let table = table();
        let cache = RouteCache::with_capacity(4);

        let epoch = cache.epoch();
        let matched = resolve(&table, "/users/1");
        cache.invalidate_all();

        assert!(!cache.insert_if_current(epoch, Method::GET, "/users/1", matched.clone()));
        assert!(cache.lookup(&Method::GET, "/users/1").is_none());
        assert!(cache.insert_if_current(cache.epoch(), Method::GET, "/users/1", matched));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let table = table();
        let cache = RouteCache::new(CacheConfig::with_capacity(4).ttl(Duration::from_secs(60)));
        cache.insert(Method::GET, "/static/a", resolve(&table, "/static/a"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.lookup(&Method::GET, "/static/a").is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.lookup(&Method::GET, "/static/a").is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache: RouteCache<()> = RouteCache::with_capacity(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_concurrent_access_keeps_capacity() {
        let table = Arc::new(table());
        let cache = Arc::new(RouteCache::with_capacity(8));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let path = format!("/users/{}", (t * 7 + i) % 32);
                        if cache.lookup(&Method::GET, &path).is_none() {
                            let matched = table.resolve_path(&Method::GET, &path).unwrap();
                            cache.insert(Method::GET, &path, matched);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.size <= 8);
        assert_eq!(stats.hits + stats.misses, 8 * 200);
    }

    proptest! {
        #[test]
        fn prop_hits_match_fresh_resolution(ids in prop::collection::vec(0u8..24, 1..200)) {
            let table = table();
            let cache = RouteCache::with_capacity(8);

            for id in ids {
                let path = format!("/users/{id}");
                let fresh = resolve(&table, &path);
                match cache.lookup(&Method::GET, &path) {
                    Some(entry) => prop_assert!(entry.matched.same_as(&fresh)),
                    None => cache.insert(Method::GET, &path, fresh),
                }
            }
        }

        #[test]
        fn prop_overflow_evicts_exactly_the_oldest(capacity in 1usize..16) {
            let table = table();
            let cache = RouteCache::with_capacity(capacity);
            for i in 0..=capacity {
                let path = format!("/users/{i}");
                cache.insert(Method::GET, &path, resolve(&table, &path));
            }

            prop_assert!(cache.lookup(&Method::GET, "/users/0").is_none());
            for i in 1..=capacity {
                let path = format!("/users/{i}");
                prop_assert!(cache.lookup(&Method::GET, &path).is_some());
            }
            prop_assert_eq!(cache.stats().evictions, 1);
        }
    }
}
