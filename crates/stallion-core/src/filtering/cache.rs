use crate::primitives::DEFAULT_FILTER_CACHE_CAPACITY;
use lru::LruCache;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

struct BucketCache {
    /// Bumped on every clear. A result computed against an older
    /// generation is never served nor stored.
    generation: u64,
    entries: LruCache<String, CacheEntry>,
}

impl BucketCache {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            generation: 0,
            entries: LruCache::new(capacity),
        }
    }
}

/// Per-bucket cache of filter results with a fixed time-to-live and a
/// bounded number of entries per bucket.
///
/// Values are type-erased; `get` returns `None` both on a miss and when the
/// stored value has a different type than requested.
///
/// Every bucket carries a generation. Readers capture it before they take
/// their snapshot and pass it back on `get` and `set`, so a result computed
/// from data older than the last `clear_bucket` is discarded.
pub struct FilterCache {
    buckets: Mutex<BTreeMap<String, BucketCache>>,
    ttl: Duration,
    capacity: NonZeroUsize,
}

impl std::fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCache")
            .field("buckets", &self.buckets.lock().len())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl FilterCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_FILTER_CACHE_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            ttl,
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn init_bucket(&self, bucket: &str) {
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_insert_with(|| BucketCache::new(self.capacity));
    }

    /// Current generation of `bucket`.
    #[must_use]
    pub fn generation(&self, bucket: &str) -> u64 {
        self.buckets.lock().get(bucket).map_or(0, |b| b.generation)
    }

    #[must_use]
    pub fn get<V: Clone + 'static>(&self, bucket: &str, key: &str, generation: u64) -> Option<V> {
        let mut buckets = self.buckets.lock();
        let cache = buckets.get_mut(bucket)?;
        if cache.generation != generation {
            return None;
        }
        let entry = cache.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            cache.entries.pop(key);
            return None;
        }
        entry.value.downcast_ref::<V>().cloned()
    }

    /// Store `value` unless `bucket` was cleared since `generation` was read.
    pub fn set<V: Send + Sync + 'static>(&self, bucket: &str, key: &str, generation: u64, value: V) {
        let mut buckets = self.buckets.lock();
        let cache = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketCache::new(self.capacity));
        if cache.generation != generation {
            trace!(bucket, key, "dropping filter result from an older generation");
            return;
        }
        let entry = CacheEntry {
            value: Arc::new(value),
            expires_at: Instant::now() + self.ttl,
        };
        cache.entries.put(key.to_string(), entry);
    }

    pub fn clear_bucket(&self, bucket: &str) {
        let mut buckets = self.buckets.lock();
        let cache = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketCache::new(self.capacity));
        if !cache.entries.is_empty() {
            trace!(bucket, entries = cache.entries.len(), "clearing filter cache");
        }
        cache.entries.clear();
        cache.generation += 1;
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for cache in self.buckets.lock().values_mut() {
            let expired: Vec<String> = cache
                .entries
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                cache.entries.pop(key);
            }
            removed += expired.len();
        }
        removed
    }

    pub fn clear_all(&self) {
        for cache in self.buckets.lock().values_mut() {
            cache.entries.clear();
            cache.generation += 1;
        }
    }

    /// Number of live and expired entries held for `bucket`.
    #[must_use]
    pub fn len(&self, bucket: &str) -> usize {
        self.buckets.lock().get(bucket).map_or(0, |b| b.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_typed() {
        let cache = FilterCache::new(Duration::from_secs(60));
        cache.set("articles", "count", 0, 3usize);
        assert_eq!(cache.get::<usize>("articles", "count", 0), Some(3));
        assert_eq!(cache.get::<String>("articles", "count", 0), None);
        assert_eq!(cache.get::<usize>("other", "count", 0), None);
    }

    #[test]
    fn clear_bucket_leaves_others() {
        let cache = FilterCache::new(Duration::from_secs(60));
        cache.set("a", "k", 0, 1usize);
        cache.set("b", "k", 0, 2usize);
        cache.clear_bucket("a");
        assert_eq!(cache.get::<usize>("a", "k", cache.generation("a")), None);
        assert_eq!(cache.get::<usize>("b", "k", cache.generation("b")), Some(2));
    }

    #[test]
    fn zero_ttl_entries_expire_immediately() {
        let cache = FilterCache::new(Duration::ZERO);
        cache.set("a", "k", 0, 1usize);
        cache.set("a", "j", 0, 2usize);
        assert_eq!(cache.get::<usize>("a", "k", 0), None);
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len("a"), 0);
    }

    #[test]
    fn init_bucket_is_idempotent() {
        let cache = FilterCache::new(Duration::from_secs(1));
        cache.init_bucket("a");
        cache.set("a", "k", 0, 1usize);
        cache.init_bucket("a");
        assert_eq!(cache.len("a"), 1);
        cache.clear_all();
        assert_eq!(cache.len("a"), 0);
    }

    #[test]
    fn result_from_before_a_clear_is_dropped() {
        let cache = FilterCache::new(Duration::from_secs(60));
        let before = cache.generation("a");
        cache.clear_bucket("a");
        cache.set("a", "count", before, 1usize);
        assert_eq!(cache.len("a"), 0);

        let now = cache.generation("a");
        assert!(now > before);
        cache.set("a", "count", now, 2usize);
        assert_eq!(cache.get::<usize>("a", "count", before), None);
        assert_eq!(cache.get::<usize>("a", "count", now), Some(2));

        cache.clear_all();
        assert_eq!(cache.get::<usize>("a", "count", now), None);
        cache.set("a", "count", now, 3usize);
        assert_eq!(cache.len("a"), 0);
    }

    #[test]
    fn bucket_size_is_capped() {
        let cache = FilterCache::with_capacity(Duration::from_secs(60), 8);
        for i in 0..1_000usize {
            cache.set("a", &format!("query-{}", i), 0, i);
        }
        assert_eq!(cache.len("a"), 8);
        assert_eq!(cache.get::<usize>("a", "query-999", 0), Some(999));
        assert_eq!(cache.get::<usize>("a", "query-0", 0), None);
    }

    #[test]
    fn least_recently_read_entry_goes_first() {
        let cache = FilterCache::with_capacity(Duration::from_secs(60), 2);
        cache.set("a", "hot", 0, 1usize);
        cache.set("a", "cold", 0, 2usize);
        assert_eq!(cache.get::<usize>("a", "hot", 0), Some(1));
        cache.set("a", "new", 0, 3usize);
        assert_eq!(cache.get::<usize>("a", "hot", 0), Some(1));
        assert_eq!(cache.get::<usize>("a", "cold", 0), None);
    }

    #[test]
    fn zero_capacity_holds_one_entry() {
        let cache = FilterCache::with_capacity(Duration::from_secs(60), 0);
        assert_eq!(cache.capacity(), 1);
        cache.set("a", "k", 0, 1usize);
        cache.set("a", "j", 0, 2usize);
        assert_eq!(cache.len("a"), 1);
    }
}
