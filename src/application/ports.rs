//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, TokioClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for concurrent key-value storage.
///
/// The cache keeps its entries behind this port so the backing map can be
/// swapped without touching expiry logic. Infrastructure provides
/// `ShardedStorage`.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Run `reader` against the value stored under `key`, if any.
    fn read<R>(&self, key: &K, reader: impl FnOnce(&V) -> R) -> Option<R>;

    /// Insert or replace the value under `key`.
    fn insert(&self, key: K, value: V);

    /// Remove and return the value under `key`.
    fn remove(&self, key: &K) -> Option<V>;

    /// Remove the value under `key` only if `predicate` holds for it.
    ///
    /// Returns `true` if a value was removed.
    fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Iterate over all entries, providing access to both key and value.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

impl<K, V, S> Storage<K, V> for Arc<S>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
    S: Storage<K, V>,
{
    fn read<R>(&self, key: &K, reader: impl FnOnce(&V) -> R) -> Option<R> {
        S::read(self, key, reader)
    }

    fn insert(&self, key: K, value: V) {
        S::insert(self, key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        S::remove(self, key)
    }

    fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool {
        S::remove_if(self, key, predicate)
    }

    fn len(&self) -> usize {
        S::len(self)
    }

    fn is_empty(&self) -> bool {
        S::is_empty(self)
    }

    fn clear(&self) {
        S::clear(self)
    }

    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V),
    {
        S::for_each(self, f)
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        S::retain(self, f)
    }
}
