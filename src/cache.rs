//! Result caching for expensive queries
//!
//! Byte-budgeted cache with TTL expiry and least-recently-used eviction.
//! Entries are weighed by [`CacheWeight`]; when an insert would push the
//! total past the budget, the least recently used entries are evicted until
//! it fits. Expired entries are dropped lazily on lookup, or in bulk via
//! [`SearchCache::sweep_expired`].

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Fixed bookkeeping weight added to serialized fallback estimates
pub const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Estimated memory footprint of a cached value
///
/// Numbers weigh 8 bytes and string characters 2 bytes, matching how the
/// sizes of mixed-payload results are estimated elsewhere in the engine.
pub trait CacheWeight {
    fn weight(&self) -> usize;
}

impl CacheWeight for String {
    fn weight(&self) -> usize {
        self.len() * 2
    }
}

impl CacheWeight for Vec<f32> {
    fn weight(&self) -> usize {
        self.len() * 8
    }
}

impl CacheWeight for Vec<f64> {
    fn weight(&self) -> usize {
        self.len() * 8
    }
}

/// Weight estimate for values without a cheap closed form
pub fn serialized_weight<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(0)
        + ENTRY_OVERHEAD_BYTES
}

/// Normalized cache key built from a query and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key; parameter order does not affect the result
    pub fn new(query: &str, params: &[(&str, String)]) -> Self {
        let mut params: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        params.sort();
        Self(format!("{}|{}", params.join("&"), query))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache sizing and expiry knobs
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total byte budget across all entries
    pub max_bytes: usize,

    /// TTL applied by [`SearchCache::set`]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
        }
    }
}

struct Entry<V> {
    value: V,
    weight: usize,
    expires_at: Instant,
    last_access: u64,
}

struct CacheInner<V> {
    map: HashMap<CacheKey, Entry<V>>,
    size_bytes: usize,
    access_counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
    lookups: u64,
    lookup_nanos: u64,
}

impl<V> CacheInner<V> {
    fn remove(&mut self, key: &CacheKey) -> Option<Entry<V>> {
        let entry = self.map.remove(key)?;
        self.size_bytes -= entry.weight;
        Some(entry)
    }
}

/// Byte-budgeted TTL cache guarded by a single mutex
pub struct SearchCache<V> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
}

impl<V: CacheWeight + Clone> SearchCache<V> {
    /// Create a cache with the given budget and default TTL
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                size_bytes: 0,
                access_counter: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expired: 0,
                lookups: 0,
                lookup_nanos: 0,
            }),
            config,
        }
    }

    /// Look up a cached value, refreshing its recency on hit
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let started = Instant::now();
        let now = started;
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let counter = inner.access_counter;

        enum Lookup<V> {
            Hit(V),
            Expired,
            Absent,
        }

        let lookup = match inner.map.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = counter;
                Lookup::Hit(entry.value.clone())
            }
            Some(_) => Lookup::Expired,
            None => Lookup::Absent,
        };

        let result = match lookup {
            Lookup::Hit(value) => {
                inner.hits += 1;
                Some(value)
            }
            Lookup::Expired => {
                inner.remove(key);
                inner.expired += 1;
                inner.misses += 1;
                None
            }
            Lookup::Absent => {
                inner.misses += 1;
                None
            }
        };

        inner.lookups += 1;
        inner.lookup_nanos += started.elapsed().as_nanos() as u64;
        result
    }

    /// Check whether a live entry exists for `key`
    ///
    /// A peek: counts neither as a hit nor a miss and does not refresh the
    /// entry's recency.
    pub fn has(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.map.get(key).is_some_and(|entry| entry.expires_at > now)
    }

    /// Insert with the default TTL
    pub fn set(&self, key: CacheKey, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Insert with an explicit TTL
    ///
    /// Values heavier than the whole budget are not cached.
    pub fn set_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        let weight = value.weight();
        if weight > self.config.max_bytes {
            log::debug!(
                "Skipping cache insert for {}: {} bytes exceeds budget",
                key.as_str(),
                weight
            );
            return;
        }

        let mut inner = self.inner.lock();
        inner.remove(&key);

        while inner.size_bytes + weight > self.config.max_bytes {
            let lru = inner
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            match lru {
                Some(victim) => {
                    inner.remove(&victim);
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        inner.access_counter += 1;
        let entry = Entry {
            value,
            weight,
            expires_at: Instant::now() + ttl,
            last_access: inner.access_counter,
        };
        inner.size_bytes += weight;
        inner.map.insert(key, entry);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let stale: Vec<CacheKey> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &stale {
            inner.remove(key);
        }
        inner.expired += stale.len() as u64;
        stale.len()
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.size_bytes = 0;
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters since construction
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
            evictions: inner.evictions,
            expired: inner.expired,
            entries: inner.map.len(),
            size_bytes: inner.size_bytes,
            max_bytes: self.config.max_bytes,
            avg_lookup_micros: if inner.lookups == 0 {
                0.0
            } else {
                inner.lookup_nanos as f64 / inner.lookups as f64 / 1_000.0
            },
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expired: u64,
    pub entries: usize,
    pub size_bytes: usize,
    pub max_bytes: usize,
    pub avg_lookup_micros: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_bytes: usize) -> SearchCache<Vec<f32>> {
        SearchCache::new(CacheConfig {
            max_bytes,
            default_ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_set_and_get() {
        let cache = small_cache(1024);
        let key = CacheKey::new("query", &[("limit", "10".to_string())]);

        cache.set(key.clone(), vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get(&key), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_miss() {
        let cache = small_cache(1024);
        let key = CacheKey::new("absent", &[]);
        assert_eq!(cache.get(&key), None);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_key_param_order_is_normalized() {
        let a = CacheKey::new("q", &[("limit", "5".to_string()), ("min", "0.2".to_string())]);
        let b = CacheKey::new("q", &[("min", "0.2".to_string()), ("limit", "5".to_string())]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_weight_accounting() {
        let cache = small_cache(1024);
        cache.set(CacheKey::new("a", &[]), vec![0.0; 10]);
        cache.set(CacheKey::new("b", &[]), vec![0.0; 20]);

        // 10 and 20 numbers at 8 bytes each
        assert_eq!(cache.stats().size_bytes, 240);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_eviction_on_overflow() {
        // Budget fits two 10-number entries, not three
        let cache = small_cache(200);
        let a = CacheKey::new("a", &[]);
        let b = CacheKey::new("b", &[]);
        let c = CacheKey::new("c", &[]);

        cache.set(a.clone(), vec![0.0; 10]);
        cache.set(b.clone(), vec![1.0; 10]);

        // Touch "a" so "b" becomes the LRU victim
        assert!(cache.get(&a).is_some());

        cache.set(c.clone(), vec![2.0; 10]);

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_oversized_entry_is_not_cached() {
        let cache = small_cache(64);
        let key = CacheKey::new("huge", &[]);
        cache.set(key.clone(), vec![0.0; 1000]);

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().size_bytes, 0);
    }

    #[test]
    fn test_replacing_entry_updates_size() {
        let cache = small_cache(1024);
        let key = CacheKey::new("k", &[]);

        cache.set(key.clone(), vec![0.0; 10]);
        cache.set(key.clone(), vec![0.0; 5]);

        assert_eq!(cache.stats().size_bytes, 40);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry_on_lookup() {
        let cache = small_cache(1024);
        let key = CacheKey::new("short", &[]);
        cache.set_with_ttl(key.clone(), vec![1.0], Duration::from_millis(20));

        assert!(cache.get(&key).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.has(&key));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_has_is_a_silent_peek() {
        let cache = small_cache(1024);
        let key = CacheKey::new("q", &[]);
        assert!(!cache.has(&key));

        cache.set(key.clone(), vec![1.0]);
        assert!(cache.has(&key));

        // Neither lookup above moved the hit or miss counters
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_sweep_expired() {
        let cache = small_cache(1024);
        cache.set_with_ttl(CacheKey::new("a", &[]), vec![1.0], Duration::from_millis(10));
        cache.set_with_ttl(CacheKey::new("b", &[]), vec![2.0], Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(30));
        let removed = cache.sweep_expired();

        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&CacheKey::new("b", &[])).is_some());
    }

    #[test]
    fn test_clear() {
        let cache = small_cache(1024);
        cache.set(CacheKey::new("a", &[]), vec![1.0]);
        cache.set(CacheKey::new("b", &[]), vec![2.0]);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().size_bytes, 0);
    }

    #[test]
    fn test_hit_rate_and_latency_stats() {
        let cache = small_cache(1024);
        let key = CacheKey::new("q", &[]);
        cache.set(key.clone(), vec![1.0]);

        assert!(cache.get(&key).is_some());
        assert!(cache.get(&key).is_some());
        assert!(cache.get(&CacheKey::new("other", &[])).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(stats.avg_lookup_micros >= 0.0);
    }

    #[test]
    fn test_string_weight() {
        assert_eq!("abcd".to_string().weight(), 8);
        assert_eq!(vec![0.0f32; 3].weight(), 24);
    }

    #[test]
    fn test_serialized_weight_fallback() {
        #[derive(Serialize)]
        struct Payload {
            name: String,
        }
        let w = serialized_weight(&Payload {
            name: "x".to_string(),
        });
        // {"name":"x"} is 12 bytes plus the fixed overhead
        assert_eq!(w, 12 + ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(small_cache(1024 * 1024));
        let mut handles = vec![];

        for i in 0..8u32 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for j in 0..100u32 {
                    let key = CacheKey::new(&format!("q{i}"), &[("j", j.to_string())]);
                    cache.set(key.clone(), vec![i as f32, j as f32]);
                    cache.get(&key);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.stats().hits > 0);
    }
}
