use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;

use super::{HotStore, ScanPage};
use crate::cache::entry::CacheEntry;
use crate::cache::error::StoreError;
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::metrics::METRIC_L1_EVICT;
use crate::cache::pattern::KeyPattern;

const SOURCE: &str = "cache::hot::memory";

/// In-process hot store: a fixed set of LRU shards with lazy TTL expiry.
///
/// Each key lives in exactly one shard. A scan visits one shard per step, so
/// pattern invalidation never holds more than one shard lock at a time.
pub struct MemoryHotStore {
    shards: Vec<RwLock<LruCache<String, CacheEntry>>>,
}

impl MemoryHotStore {
    pub fn new(capacity: NonZeroUsize, shards: NonZeroUsize) -> Self {
        let shard_count = shards.get().min(capacity.get());
        let per_shard = capacity.get().div_ceil(shard_count);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shard_count)
                .map(|_| RwLock::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<LruCache<String, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| rw_read(shard, SOURCE, "len").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut shard = rw_write(self.shard(key), SOURCE, "get");
        let expired = match shard.get_mut(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.hit_count = entry.hit_count.saturating_add(1);
                return Ok(Some(entry.clone()));
            }
        };
        if expired {
            shard.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let key = entry.key.clone();
        let evicted = rw_write(self.shard(&key), SOURCE, "put").push(key.clone(), entry);
        if evicted.is_some_and(|(evicted_key, _)| evicted_key != key) {
            counter!(METRIC_L1_EVICT).increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(rw_write(self.shard(key), SOURCE, "delete").pop(key).is_some())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &KeyPattern,
        _count: usize,
    ) -> Result<ScanPage, StoreError> {
        let index = cursor as usize;
        let Some(shard) = self.shards.get(index) else {
            return Ok(ScanPage::default());
        };
        let keys = rw_read(shard, SOURCE, "scan")
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        let next = index + 1;
        let next_cursor = if next < self.shards.len() { next as u64 } else { 0 };
        Ok(ScanPage { next_cursor, keys })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
