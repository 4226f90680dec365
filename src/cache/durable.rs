//! Durable (L2) tier: survives restarts and repopulates the hot tier.
//!
//! The Postgres adapter lives in `infra::db`; [`NullDurableStore`] turns the
//! service into a single-tier cache without changing its contract.

use async_trait::async_trait;
use time::OffsetDateTime;

use super::entry::CacheEntry;
use super::error::StoreError;
use super::pattern::KeyPattern;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch an entry that has not yet expired.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace an entry. A stored row created after `entry` wins.
    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError>;

    /// Best-effort hit counter bump.
    async fn record_hit(&self, key: &str) -> Result<(), StoreError>;

    /// Remove rows whose `expires_at` is not after `now`.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError>;

    fn backend(&self) -> &'static str;
}

/// Durable tier that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDurableStore;

#[async_trait]
impl DurableStore for NullDurableStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(None)
    }

    async fn upsert(&self, _entry: &CacheEntry) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn delete_matching(&self, _pattern: &KeyPattern) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn record_hit(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn purge_expired(&self, _now: OffsetDateTime) -> Result<u64, StoreError> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "null"
    }
}
