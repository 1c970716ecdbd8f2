//! Time-bounded cache.
//!
//! Entries carry their own expiry instant. Expiry is lazy: a read that finds
//! an expired entry evicts it and reports a miss. Nothing sweeps in the
//! background; [`TtlCache::purge_expired`] exists for callers that want to
//! reclaim memory on their own schedule.

use crate::application::ports::{Clock, Storage};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedStorage;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// TTL applied by [`TtlCache::insert`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// A stored value and the instant it stops being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,
    /// First instant at which the entry counts as a miss
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Create an entry that lives for `ttl` from `now`.
    pub fn new(value: V, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64)),
        }
    }

    /// Whether the entry has expired at `now`.
    ///
    /// The deadline instant itself is expired, unlike a `now > expires_at`
    /// check, so a zero TTL never serves and an entry set for `ttl` is a
    /// miss once exactly `ttl` has elapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Key/value cache with per-entry expiry.
///
/// Cheap to clone; clones share the same entries. Safe to use from any
/// number of tasks or threads.
///
/// # Example
/// ```
/// use fetch_throttle::TtlCache;
/// use std::time::Duration;
///
/// let cache = TtlCache::new();
/// cache.set("top/anime?page=1".to_string(), 42, Duration::from_secs(6 * 60 * 60));
///
/// assert_eq!(cache.get(&"top/anime?page=1".to_string()), Some(42));
/// assert!(!cache.has(&"top/manga?page=1".to_string()));
/// ```
pub struct TtlCache<K, V, S = Arc<ShardedStorage<K, CacheEntry<V>>>>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
    S: Storage<K, CacheEntry<V>>,
{
    storage: S,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    /// Create an empty cache reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty cache reading `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_storage(Arc::new(ShardedStorage::new()), clock)
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> TtlCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
    S: Storage<K, CacheEntry<V>>,
{
    /// Create a cache over a custom storage backend.
    pub fn with_storage(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            default_ttl: DEFAULT_TTL,
            _entries: PhantomData,
        }
    }

    /// Change the TTL used by [`insert`](TtlCache::insert).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Return the value under `key` if present and unexpired.
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let now = self.clock.now();
        let found = self.storage.read(key, |entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match found {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.evict_expired(key, now);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any existing entry.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = self.clock.now();
        self.storage.insert(key, CacheEntry::new(value, now, ttl));
    }

    /// Store `value` under `key` with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Whether `key` holds an unexpired entry. Evicts an expired one.
    pub fn has(&self, key: &K) -> bool {
        let now = self.clock.now();
        match self.storage.read(key, |entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                self.evict_expired(key, now);
                false
            }
            None => false,
        }
    }

    /// Time left before the entry under `key` expires.
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        let now = self.clock.now();
        self.storage
            .read(key, |entry| (!entry.is_expired(now)).then(|| entry.remaining(now)))
            .flatten()
    }

    /// Remove the entry under `key`, expired or not.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.storage.remove(key).map(|entry| entry.value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Keys of all unexpired entries.
    pub fn keys(&self) -> Vec<K> {
        let now = self.clock.now();
        let mut keys = Vec::new();
        self.storage.for_each(|key, entry| {
            if !entry.is_expired(now) {
                keys.push(key.clone());
            }
        });
        keys
    }

    /// Stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Evict every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.storage.len();
        self.storage.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.storage.len())
    }

    /// TTL used by [`insert`](TtlCache::insert).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn evict_expired(&self, key: &K, now: Instant) {
        // A concurrent `set` may have refreshed the entry since it was read.
        if self.storage.remove_if(key, |entry| entry.is_expired(now)) {
            tracing::trace!("evicted expired cache entry");
        }
    }
}

impl<K, V, S> Clone for TtlCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
    S: Storage<K, CacheEntry<V>> + Clone,
{
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            clock: Arc::clone(&self.clock),
            default_ttl: self.default_ttl,
            _entries: PhantomData,
        }
    }
}

impl<K, V, S> Debug for TtlCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
    S: Storage<K, CacheEntry<V>>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.storage.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
