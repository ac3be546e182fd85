// src/cache/mod.rs
//! In-process cache (C2, §4.2): capacity-bounded, hit-count-and-age
//! eviction, TTL expiry, hit/miss stats. All mutation happens under a
//! single lock — the cache is not expected to be a contention hot path at
//! expected request rates (§4.2), the same tradeoff the teacher's
//! SQLite-backed `LlmCache` makes by serializing through one connection.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    created_at: Instant,
    hit_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    stats: CacheStats,
}

pub struct Cache<V: Clone> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    default_ttl: Duration,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            capacity,
            default_ttl,
        }
    }

    /// Returns the value if present and not expired, incrementing
    /// `hit_count`; otherwise a miss. Never suspends (§5).
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = inner
            .entries
            .get(key)
            .map(|e| e.created_at.elapsed() >= self.default_ttl)
            .unwrap_or(false);

        if expired {
            inner.entries.remove(key);
            inner.stats.misses += 1;
            inner.stats.size = inner.entries.len();
            return None;
        }

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.hit_count += 1;
            inner.stats.hits += 1;
            return Some(entry.value.clone());
        }

        inner.stats.misses += 1;
        None
    }

    /// Inserts `value` under `key`. If at capacity and `key` is new,
    /// evicts the entry with the lowest `(hit_count, created_at)` first.
    pub fn insert(&self, key: String, value: V) {
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.hit_count, e.created_at))
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&victim);
                inner.stats.evictions += 1;
            }
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
                hit_count: 0,
            },
        );
        inner.stats.size = inner.entries.len();
    }

    /// Periodic maintenance pass: drops expired entries (§4.2). Returns the
    /// number dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let ttl = self.default_ttl;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.created_at.elapsed() < ttl);
        inner.stats.size = inner.entries.len();
        before - inner.entries.len()
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_some() {
            inner.stats.size = inner.entries.len();
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_miss_after_eviction() {
        let cache: Cache<i32> = Cache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.get("a"), Some(1)); // bumps a's hit_count above b's
        cache.insert("c".to_string(), 3); // evicts lowest (hit_count, created_at) -> b
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn ttl_expiry_is_treated_as_miss() {
        let cache: Cache<i32> = Cache::new(10, Duration::from_millis(10));
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn sweep_expired_drops_only_expired_entries() {
        let cache: Cache<i32> = Cache::new(10, Duration::from_millis(10));
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(30));
        cache.insert("b".to_string(), 2);
        let dropped = cache.sweep_expired();
        assert_eq!(dropped, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_removes_entry_immediately() {
        let cache: Cache<i32> = Cache::new(10, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn repeated_lookup_is_stable_within_ttl() {
        let cache: Cache<Vec<i32>> = Cache::new(10, Duration::from_secs(60));
        cache.insert("q".to_string(), vec![1, 2, 3]);
        assert_eq!(cache.get("q"), cache.get("q"));
    }
}
