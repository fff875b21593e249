/*!
This module provides a cache interface and a sharded-free LRU implementation used for the table
cache and the block cache.
*/

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/**
The interface for caches used by CairnDB.

Values are handed out behind [`Arc`] so that eviction can run concurrently with readers that are
still holding an entry.
*/
pub trait Cache<K, V>: Send + Sync {
    /// Insert a value, evicting the least recently used entry if the cache is at capacity.
    fn insert(&self, key: K, value: V) -> Arc<V>;

    /// Get the cached value for `key`, marking the entry as recently used.
    fn get(&self, key: &K) -> Option<Arc<V>>;

    /// Remove the entry for `key` if one is cached.
    fn remove(&self, key: &K);

    /// The number of entries currently cached.
    fn len(&self) -> usize;

    /// Returns true if there are no cached entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The mutable state of an [`LRUCache`].
struct LRUCacheInner<K, V> {
    /// The cached values along with the recency tick of their last use.
    entries: HashMap<K, (Arc<V>, u64)>,

    /// Recency order: the entry with the smallest tick is the eviction candidate.
    recency: BTreeMap<u64, K>,

    /// The next recency tick to hand out.
    next_tick: u64,
}

/// A least-recently-used cache with a fixed entry capacity.
pub struct LRUCache<K, V> {
    /// The maximum number of entries the cache will hold.
    capacity: usize,

    /// Mutable state behind a single lock; operations are short map manipulations.
    inner: Mutex<LRUCacheInner<K, V>>,
}

/// Public methods
impl<K: Eq + Hash + Clone, V> LRUCache<K, V> {
    /// Create a new instance of [`LRUCache`] holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "An LRU cache must have a non-zero capacity.");

        Self {
            capacity,
            inner: Mutex::new(LRUCacheInner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
            }),
        }
    }
}

/// Private methods
impl<K: Eq + Hash + Clone, V> LRUCache<K, V> {
    /// Move the specified entry to the most recently used position.
    fn touch(inner: &mut LRUCacheInner<K, V>, key: &K) {
        if let Some((_, tick)) = inner.entries.get(key) {
            let old_tick = *tick;
            inner.recency.remove(&old_tick);

            let new_tick = inner.next_tick;
            inner.next_tick += 1;
            inner.recency.insert(new_tick, key.clone());
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.1 = new_tick;
            }
        }
    }
}

impl<K, V> Cache<K, V> for LRUCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn insert(&self, key: K, value: V) -> Arc<V> {
        let mut inner = self.inner.lock();
        let shared_value = Arc::new(value);

        if let Some((_, old_tick)) = inner.entries.remove(&key) {
            inner.recency.remove(&old_tick);
        }

        while inner.entries.len() >= self.capacity {
            // Evict the least recently used entry
            if let Some((&oldest_tick, _)) = inner.recency.iter().next() {
                if let Some(evicted_key) = inner.recency.remove(&oldest_tick) {
                    inner.entries.remove(&evicted_key);
                }
            } else {
                break;
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(key, (Arc::clone(&shared_value), tick));

        shared_value
    }

    fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).map(|(value, _)| Arc::clone(value))?;
        LRUCache::touch(&mut inner, key);

        Some(value)
    }

    fn remove(&self, key: &K) {
        let mut inner = self.inner.lock();
        if let Some((_, tick)) = inner.entries.remove(key) {
            inner.recency.remove(&tick);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
