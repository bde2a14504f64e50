use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

/// Thread id → owner id, for threads already confirmed in the store.
///
/// Owners are never reassigned, so an entry stays valid until evicted.
#[derive(Clone)]
pub struct ThreadOwnerCache {
    cache: Arc<Mutex<LruCache<u64, u64>>>,
}

impl ThreadOwnerCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn insert(&self, thread_id: u64, owner_id: u64) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.put(thread_id, owner_id);
    }

    pub fn get(&self, thread_id: u64) -> Option<u64> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(&thread_id).copied()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
