use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use super::{HotStore, ScanPage};
use crate::cache::entry::{CacheEntry, Payload};
use crate::cache::error::{StoreError, Tier};
use crate::cache::pattern::{KeyPattern, escape_glob};

#[derive(Debug, Clone)]
pub struct RedisHotStoreConfig {
    pub url: String,
    /// Namespace prepended to every key, e.g. `bookbytes:`.
    pub key_prefix: String,
}

/// Hot store backed by Redis.
///
/// Entries are stored as a JSON envelope with a native `PX` expiry, so Redis
/// evicts them on its own; the envelope carries the freshness metadata.
#[derive(Clone)]
pub struct RedisHotStore {
    conn: ConnectionManager,
    key_prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: serde_json::Value,
    source: String,
    created_at_ms: i64,
    expires_at_ms: i64,
    original_ttl_ms: u64,
    #[serde(default)]
    hit_count: u64,
}

impl RedisHotStore {
    pub async fn connect(config: RedisHotStoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(key_prefix = %config.key_prefix, "Connected hot store to Redis");
        Ok(Self {
            conn,
            key_prefix: config.key_prefix,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn strip_prefix(&self, full_key: String) -> Option<String> {
        full_key.strip_prefix(&self.key_prefix).map(str::to_string)
    }
}

#[async_trait]
impl HotStore for RedisHotStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;
        let Some(bytes) = data else {
            return Ok(None);
        };
        let entry = decode_envelope(key, &bytes)?;
        if entry.is_expired(OffsetDateTime::now_utc()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let ttl = entry.remaining(OffsetDateTime::now_utc());
        if ttl.is_zero() {
            return Ok(());
        }
        let data = encode_envelope(&entry)?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.full_key(&entry.key))
            .arg(data)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(self.full_key(key)).await?;
        Ok(deleted > 0)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &KeyPattern,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let full_pattern = format!(
            "{}{}",
            escape_glob(&self.key_prefix),
            pattern.to_redis_match()
        );
        let mut conn = self.conn.clone();
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(full_pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage {
            next_cursor,
            keys: keys
                .into_iter()
                .filter_map(|key| self.strip_prefix(key))
                .collect(),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn from_unix_millis(key: &str, millis: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| StoreError::corrupt(Tier::Hot, key, err.to_string()))
}

fn encode_envelope(entry: &CacheEntry) -> Result<Vec<u8>, StoreError> {
    let payload = entry
        .payload
        .to_value()
        .map_err(|err| StoreError::corrupt(Tier::Hot, &entry.key, err.to_string()))?;
    let envelope = Envelope {
        payload,
        source: entry.source.clone(),
        created_at_ms: unix_millis(entry.created_at),
        expires_at_ms: unix_millis(entry.expires_at),
        original_ttl_ms: u64::try_from(entry.original_ttl.as_millis()).unwrap_or(u64::MAX),
        hit_count: entry.hit_count,
    };
    serde_json::to_vec(&envelope)
        .map_err(|err| StoreError::corrupt(Tier::Hot, &entry.key, err.to_string()))
}

fn decode_envelope(key: &str, bytes: &[u8]) -> Result<CacheEntry, StoreError> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|err| StoreError::corrupt(Tier::Hot, key, err.to_string()))?;
    Ok(CacheEntry {
        key: key.to_string(),
        payload: Payload::from_value(&envelope.payload),
        source: envelope.source,
        created_at: from_unix_millis(key, envelope.created_at_ms)?,
        expires_at: from_unix_millis(key, envelope.expires_at_ms)?,
        original_ttl: Duration::from_millis(envelope.original_ttl_ms),
        hit_count: envelope.hit_count,
    })
}
