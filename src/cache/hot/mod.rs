//! Hot (L1) tier: fast shared key/value storage with per-entry TTL.

mod memory;
mod redis_store;

use async_trait::async_trait;

use super::entry::CacheEntry;
use super::error::StoreError;
use super::pattern::KeyPattern;

pub use self::memory::MemoryHotStore;
pub use self::redis_store::{RedisHotStore, RedisHotStoreConfig};

/// Keys per scan step when sweeping for a pattern.
pub const SCAN_BATCH: usize = 100;

/// One step of a cursor-based key scan. A `next_cursor` of zero ends the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub next_cursor: u64,
    pub keys: Vec<String>,
}

#[async_trait]
pub trait HotStore: Send + Sync {
    /// Fetch a live entry. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Store `entry` until its `expires_at`.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove a key. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Scan a bounded slice of the keyspace, starting at `cursor` (0 begins a scan).
    async fn scan(
        &self,
        cursor: u64,
        pattern: &KeyPattern,
        count: usize,
    ) -> Result<ScanPage, StoreError>;

    fn backend(&self) -> &'static str;

    /// Delete every key matching `pattern`, one scan step at a time.
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError> {
        let mut cursor = 0;
        let mut removed = 0;
        loop {
            let page = self.scan(cursor, pattern, SCAN_BATCH).await?;
            for key in &page.keys {
                if self.delete(key).await? {
                    removed += 1;
                }
            }
            cursor = page.next_cursor;
            if cursor == 0 {
                return Ok(removed);
            }
        }
    }
}
