// Memo cache of resolved descriptors keyed by canonical key. Entries are never
// evicted by size or age, only by explicit invalidation or `clear`.
use crate::descriptor::FlagDescriptor;
use crate::metrics_defs::{MEMO_CACHE_HIT, MEMO_CACHE_MISS, counter};
use moka::sync::Cache;
use std::sync::Arc;

pub struct MemoCache {
    cache: Cache<String, Arc<FlagDescriptor>>,
}

impl MemoCache {
    pub fn new() -> Self {
        MemoCache {
            cache: Cache::builder().build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<FlagDescriptor>> {
        let cached = self.cache.get(key);
        let metric_def = if cached.is_some() {
            MEMO_CACHE_HIT
        } else {
            MEMO_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        cached
    }

    /// Stores `descriptor` unless `key` is already cached. Returns whichever
    /// descriptor ends up in the cache.
    pub fn put(&self, key: &str, descriptor: Arc<FlagDescriptor>) -> Arc<FlagDescriptor> {
        self.cache.entry_by_ref(key).or_insert(descriptor).into_value()
    }

    /// Replaces whatever is cached under `key` with `descriptor`.
    pub fn invalidate_and_put(
        &self,
        key: &str,
        descriptor: Arc<FlagDescriptor>,
    ) -> Arc<FlagDescriptor> {
        self.cache.invalidate(key);
        self.cache.insert(key.to_string(), descriptor.clone());
        descriptor
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.cache.iter().map(|(key, _)| (*key).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry, releasing the held descriptors.
    pub fn clear(&self) {
        for key in self.keys() {
            self.cache.invalidate(&key);
        }
        self.cache.invalidate_all();
        // Removed entries stay referenced by moka's write queue until drained.
        self.cache.run_pending_tasks();
    }
}

impl Default for MemoCache {
    fn default() -> Self {
        MemoCache::new()
    }
}
