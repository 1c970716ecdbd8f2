//! Storage implementations for cache entries.
//!
//! Provides concurrent, sharded storage shared by every caller of the cache.

use crate::application::ports::Storage;
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Thread-safe sharded storage backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained locking for writes,
/// so call sites reading the cache never contend on one global lock.
#[derive(Debug)]
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, V, RandomState>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Create a storage instance with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(capacity, RandomState::new()),
        }
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn read<R>(&self, key: &K, reader: impl FnOnce(&V) -> R) -> Option<R> {
        self.map.get(key).map(|entry| reader(entry.value()))
    }

    fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool {
        self.map.remove_if(key, |_, value| predicate(value)).is_some()
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear()
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for entry in self.map.iter() {
            f(entry.key(), entry.value());
        }
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.map.retain(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn value(storage: &ShardedStorage<&'static str, u32>, key: &'static str) -> Option<u32> {
        storage.read(&key, |v| *v)
    }

    #[test]
    fn test_insert_overwrites() {
        let storage: ShardedStorage<&str, u32> = ShardedStorage::new();

        storage.insert("anime/1", 100);
        storage.insert("anime/2", 200);
        storage.insert("anime/1", 150);

        assert_eq!(value(&storage, "anime/1"), Some(150));
        assert_eq!(value(&storage, "anime/2"), Some(200));
        assert_eq!(value(&storage, "anime/3"), None);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_remove_if() {
        let storage: ShardedStorage<&str, u32> = ShardedStorage::new();
        storage.insert("anime/1", 100);

        assert!(!storage.remove_if(&"anime/1", |v| *v > 150));
        assert_eq!(value(&storage, "anime/1"), Some(100));

        assert!(storage.remove_if(&"anime/1", |v| *v < 150));
        assert_eq!(storage.remove(&"anime/1"), None);
    }

    #[test]
    fn test_retain_and_clear() {
        let storage: ShardedStorage<u32, u32> = ShardedStorage::with_capacity(16);
        for i in 0..10u32 {
            storage.insert(i, i * 10);
        }

        storage.retain(|_, v| *v >= 50);
        assert_eq!(storage.len(), 5);

        let mut seen = 0;
        storage.for_each(|k, v| {
            assert_eq!(*v, k * 10);
            seen += 1;
        });
        assert_eq!(seen, 5);

        storage.clear();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_shared_through_arc() {
        use std::thread;

        let storage = Arc::new(ShardedStorage::<String, u32>::new());
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for j in 0..100u32 {
                        storage.insert(format!("anime/{}/{}", i, j), i * 100 + j);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Storage::len(&storage), 800);
    }
}
