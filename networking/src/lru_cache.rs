use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// Fixed-capacity map that evicts the least recently used entry on overflow.
///
/// `get`, `get_mut`, `put` and `update_or_insert` count as a use and move the
/// entry to the front. `contains` and `peek` leave recency untouched. A
/// capacity of zero is raised to one.
pub struct RecencyCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> RecencyCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: LruCache::new(capacity) }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn peek(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    /// Insert or replace. Returns the entry evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        match self.inner.push(key, value) {
            // `push` also hands back the old value when the key was already present.
            Some((evicted, _)) if self.inner.contains(&evicted) => None,
            other => other,
        }
    }

    /// Apply `update` to the entry, inserting `default()` first if it is missing.
    pub fn update_or_insert(&mut self, key: K, default: impl FnOnce() -> V, update: impl FnOnce(&mut V)) {
        match self.inner.get_mut(&key) {
            Some(value) => update(value),
            None => {
                let mut value = default();
                update(&mut value);
                self.inner.put(key, value);
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool)
    where
        K: Clone,
    {
        let doomed: Vec<K> = self
            .inner
            .iter()
            .filter(|&(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.inner.pop(&key);
        }
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
