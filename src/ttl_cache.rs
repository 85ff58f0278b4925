// TTL key/value store shared by the schedule cache and the circuit breaker's
// failure memory. Expired entries are evicted lazily on access and are never
// served.

use std::{
    hash::Hash,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;

use crate::config::CacheConfig;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub eviction_count: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_alive(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    expired: AtomicUsize,
    evictions: AtomicUsize,
}

#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    store: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    max_entries: usize,
    counters: Counters,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.ttl(), config.max_entries)
    }

    pub fn with_ttl(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: DashMap::new(),
            default_ttl,
            max_entries: max_entries.max(1),
            counters: Counters::default(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // Returns the value if present and unexpired. An expired entry is removed
    // and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();

        if let Some(entry) = self.store.get(key) {
            if entry.is_alive(now) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Expired: the read guard is dropped above, re-check under the write lock
        if self
            .store
            .remove_if(key, |_, entry| !entry.is_alive(now))
            .is_some()
        {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        self.store
            .get(key)
            .map(|entry| entry.is_alive(now))
            .unwrap_or(false)
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if !self.store.contains_key(&key) {
            self.make_room();
        }
        let expires_at = Instant::now() + ttl;
        self.store.insert(key, CacheEntry { value, expires_at });
    }

    // Atomic read-modify-write. `f` sees the current live value (if any); the
    // result is stored with a fresh default TTL and returned.
    pub fn update<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let now = Instant::now();
        let expires_at = now + self.default_ttl;

        if !self.store.contains_key(&key) {
            self.make_room();
        }

        match self.store.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let next = if current.is_alive(now) {
                    f(Some(&current.value))
                } else {
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                    f(None)
                };
                occupied.insert(CacheEntry {
                    value: next.clone(),
                    expires_at,
                });
                next
            }
            Entry::Vacant(vacant) => {
                let next = f(None);
                vacant.insert(CacheEntry {
                    value: next.clone(),
                    expires_at,
                });
                next
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.store
            .remove(key)
            .and_then(|(_, entry)| entry.is_alive(now).then_some(entry.value))
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, entry| entry.is_alive(now));
        let purged = before.saturating_sub(self.store.len());
        self.counters.expired.fetch_add(purged, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn clear(&self) -> usize {
        let removed = self.store.len();
        self.store.clear();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items_count: self.store.len(),
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            miss_count: self.counters.misses.load(Ordering::Relaxed),
            expired_count: self.counters.expired.load(Ordering::Relaxed),
            eviction_count: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    // Keeps the store under its capacity: expired entries go first, then the
    // entry closest to its expiry.
    fn make_room(&self) {
        if self.store.len() < self.max_entries {
            return;
        }

        self.purge_expired();

        while self.store.len() >= self.max_entries {
            let oldest = self
                .store
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    if self.store.remove(&key).is_some() {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache(ttl_secs: u64, max_entries: usize) -> TtlCache<String, Vec<u8>> {
        TtlCache::with_ttl(Duration::from_secs(ttl_secs), max_entries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_and_ttl() {
        let cache = cache(5, 10);

        cache.insert("tenant-1".to_string(), vec![1, 2, 3]);
        cache.insert_with_ttl("tenant-2".to_string(), vec![4, 5], Duration::from_secs(2));

        assert_eq!(cache.get(&"tenant-1".to_string()), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(&"tenant-2".to_string()), Some(vec![4, 5]));

        // Wait for the shorter TTL to expire
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(cache.get(&"tenant-1".to_string()).is_some());
        assert!(cache.get(&"tenant-2".to_string()).is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(cache.get(&"tenant-1".to_string()).is_none());

        let stats = cache.stats();
        assert!(stats.expired_count >= 2, "Expected at least 2 expired items");
        assert_eq!(stats.items_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_is_served_unchanged_until_expiry() {
        let cache = cache(60, 10);
        cache.insert("t".to_string(), vec![9]);

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert_eq!(cache.get(&"t".to_string()), Some(vec![9]));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"t".to_string()), None);
        assert!(!cache.contains_key(&"t".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_refreshes_ttl_and_forgets_expired_values() {
        let cache: TtlCache<String, u32> = TtlCache::with_ttl(Duration::from_secs(10), 10);
        let key = "tenant".to_string();

        assert_eq!(cache.update(key.clone(), |c| c.copied().unwrap_or(0) + 1), 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.update(key.clone(), |c| c.copied().unwrap_or(0) + 1), 2);

        // Second update pushed expiry out to t=18s
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&key), Some(2));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.update(key.clone(), |c| c.copied().unwrap_or(0) + 1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_closest_to_expiry() {
        let cache = cache(100, 3);
        cache.insert_with_ttl("a".to_string(), vec![1], Duration::from_secs(10));
        cache.insert_with_ttl("b".to_string(), vec![2], Duration::from_secs(50));
        cache.insert_with_ttl("c".to_string(), vec![3], Duration::from_secs(30));

        cache.insert("d".to_string(), vec![4]);

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&"a".to_string()).is_none());
        assert!(cache.get(&"b".to_string()).is_some());
        assert!(cache.get(&"d".to_string()).is_some());
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_purging_expired_entries() {
        let cache = cache(100, 2);
        cache.insert_with_ttl("stale".to_string(), vec![1], Duration::from_secs(1));
        cache.insert("fresh".to_string(), vec![2]);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert("new".to_string(), vec![3]);

        assert!(cache.get(&"fresh".to_string()).is_some());
        assert!(cache.get(&"new".to_string()).is_some());
        assert_eq!(cache.stats().eviction_count, 0);
    }

    #[test]
    fn test_concurrent_access_with_contention() {
        let cache = Arc::new(cache(300, 10_000));
        let popular = ["tenant1", "tenant2", "tenant3"];

        for tenant in popular {
            cache.insert(tenant.to_string(), vec![1, 2, 3]);
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..500 {
                        let key = if j % 5 == 0 {
                            format!("tenant{}", i * 1000 + j)
                        } else {
                            popular[j % popular.len()].to_string()
                        };
                        if j % 10 < 8 {
                            let _ = cache.get(&key);
                        } else {
                            cache.insert(key, vec![i as u8, j as u8]);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.hit_count > 0, "Expected hits on popular keys");
        assert!(stats.items_count >= popular.len());
    }
}
