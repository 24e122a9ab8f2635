//! Staleness-aware bounded cache
//!
//! A fixed-capacity map that never grows past its configured size. Eviction
//! happens only when an insert would overflow: the victim is the
//! least-recently-used entry that has gone stale, or the strict LRU entry when
//! nothing is stale yet. Reads are side-effect free and never reorder entries,
//! so an attacker who can only trigger lookups cannot keep entries warm.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cached value with recency bookkeeping
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    /// Refreshed only on put, never on get
    last_used: Instant,
    /// Monotonic insertion counter, breaks recency ties deterministically
    seq: u64,
}

/// Bounded cache with staleness-preferring LRU eviction
///
/// All mutation runs under a single mutex so the insert-and-evict sequence is
/// one critical section: concurrent writers can never push the map past
/// `capacity`, even transiently.
pub struct BoundedCache<K, V> {
    entries: Mutex<CacheState<K, V>>,
    capacity: usize,
    staleness_threshold: Duration,
}

struct CacheState<K, V> {
    map: HashMap<K, CacheEntry<V>>,
    next_seq: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// Entries older than `staleness_threshold` (measured from their last
    /// put) are preferred as eviction victims. `capacity` must be non-zero;
    /// configuration validation enforces that before construction.
    pub fn new(capacity: usize, staleness_threshold: Duration) -> Self {
        BoundedCache {
            entries: Mutex::new(CacheState {
                map: HashMap::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity,
            staleness_threshold,
        }
    }

    /// Insert or replace a value, evicting first if the cache is full.
    ///
    /// Never fails and never exceeds capacity. Replacing an existing key
    /// refreshes its recency without evicting anything.
    pub fn put(&self, key: K, value: V) {
        let now = Instant::now();
        let mut state = self.entries.lock().unwrap();

        let seq = state.next_seq;
        state.next_seq += 1;

        if !state.map.contains_key(&key) && state.map.len() >= self.capacity {
            if let Some(victim) = self.pick_victim(&state.map, now) {
                state.map.remove(&victim);
                debug!(remaining = state.map.len(), "evicted cache entry");
            }
        }

        state.map.insert(
            key,
            CacheEntry {
                value,
                last_used: now,
                seq,
            },
        );
    }

    /// Look up a value without touching recency or triggering eviction.
    pub fn get(&self, key: &K) -> Option<V> {
        let state = self.entries.lock().unwrap();
        state.map.get(key).map(|entry| entry.value.clone())
    }

    /// Remove an entry, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut state = self.entries.lock().unwrap();
        state.map.remove(key).map(|entry| entry.value)
    }

    /// Get the number of entries in the cache
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().map.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().map.is_empty()
    }

    /// Maximum number of entries this cache will hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        self.entries.lock().unwrap().map.clear();
    }

    /// Choose the entry to evict: stale LRU first, strict LRU otherwise.
    ///
    /// Ties on `last_used` resolve to the lowest sequence number, so two
    /// entries put within the same clock tick still evict deterministically
    /// in insertion order.
    fn pick_victim(&self, map: &HashMap<K, CacheEntry<V>>, now: Instant) -> Option<K> {
        let candidate = map
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_used) > self.staleness_threshold)
            .min_by_key(|(_, entry)| (entry.last_used, entry.seq));

        let victim = match candidate {
            Some(found) => Some(found),
            None => map.iter().min_by_key(|(_, entry)| (entry.last_used, entry.seq)),
        };

        victim.map(|(key, _)| key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let cache = BoundedCache::new(10, Duration::from_secs(60));

        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_replaces_existing() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));

        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 3);

        // Replacing a key must not evict anyone
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(3));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let cache = BoundedCache::new(3, Duration::from_secs(0));

        for i in 0..50 {
            cache.put(i, i * 10);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_evicts_lru_when_full() {
        let cache = BoundedCache::new(2, Duration::from_secs(3600));

        cache.put("first", 1);
        cache.put("second", 2);
        // Nothing is stale with a huge threshold, so strict LRU applies:
        // "first" has the oldest put and goes first.
        cache.put("third", 3);

        assert_eq!(cache.get(&"first"), None);
        assert_eq!(cache.get(&"second"), Some(2));
        assert_eq!(cache.get(&"third"), Some(3));
    }

    #[test]
    fn test_stale_entry_preferred_over_fresher_lru() {
        let cache = BoundedCache::new(2, Duration::from_millis(20));

        cache.put("old", 1);
        std::thread::sleep(Duration::from_millis(50));
        cache.put("fresh", 2);
        // "old" is past the staleness threshold; "fresh" is not. Even
        // though both would be orderable by recency alone, the stale one
        // is evicted.
        cache.put("new", 3);

        assert_eq!(cache.get(&"old"), None);
        assert_eq!(cache.get(&"fresh"), Some(2));
        assert_eq!(cache.get(&"new"), Some(3));
    }

    #[test]
    fn test_get_does_not_refresh_recency() {
        let cache = BoundedCache::new(2, Duration::from_secs(3600));

        cache.put("a", 1);
        cache.put("b", 2);

        // Reading "a" repeatedly must not protect it from eviction
        for _ in 0..10 {
            assert_eq!(cache.get(&"a"), Some(1));
        }

        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_remove() {
        let cache = BoundedCache::new(10, Duration::from_secs(60));

        cache.put("a", 1);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = BoundedCache::new(10, Duration::from_secs(60));

        cache.put("a", 1);
        cache.put("b", 2);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_capacity_accessor() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new(7, Duration::from_secs(1));
        assert_eq!(cache.capacity(), 7);
    }

    #[test]
    fn test_concurrent_puts_stay_bounded() {
        use std::sync::Arc;

        let cache = Arc::new(BoundedCache::new(8, Duration::from_secs(0)));
        let mut handles = Vec::new();

        for t in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    cache.put(t * 1000 + i, i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 8);
    }
}
