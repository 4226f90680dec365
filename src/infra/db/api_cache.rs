use std::convert::TryFrom;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::{CacheEntry, DurableStore, KeyPattern, Payload, StoreError, Tier};

use super::map_sqlx_error;

const SELECT_LIVE: &str = r#"
    SELECT cache_key, source, response_json, expires_at, original_ttl_seconds,
           hit_count, created_at
    FROM api_cache
    WHERE cache_key = $1 AND expires_at > $2
"#;

const UPSERT: &str = r#"
    INSERT INTO api_cache (
        id, cache_key, source, response_json, expires_at,
        original_ttl_seconds, hit_count, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, 0, $7, now())
    ON CONFLICT (cache_key) DO UPDATE SET
        source = EXCLUDED.source,
        response_json = EXCLUDED.response_json,
        expires_at = EXCLUDED.expires_at,
        original_ttl_seconds = EXCLUDED.original_ttl_seconds,
        created_at = EXCLUDED.created_at,
        updated_at = now()
    WHERE api_cache.created_at <= EXCLUDED.created_at
"#;

#[derive(sqlx::FromRow)]
struct ApiCacheRow {
    cache_key: String,
    source: String,
    response_json: serde_json::Value,
    expires_at: OffsetDateTime,
    original_ttl_seconds: i64,
    hit_count: i64,
    created_at: OffsetDateTime,
}

impl TryFrom<ApiCacheRow> for CacheEntry {
    type Error = StoreError;

    fn try_from(row: ApiCacheRow) -> Result<Self, Self::Error> {
        let original_ttl = u64::try_from(row.original_ttl_seconds).map_err(|_| {
            StoreError::corrupt(
                Tier::Durable,
                &row.cache_key,
                format!("negative original ttl `{}`", row.original_ttl_seconds),
            )
        })?;
        Ok(Self {
            payload: Payload::from_value(&row.response_json),
            source: row.source,
            created_at: row.created_at,
            expires_at: row.expires_at,
            original_ttl: Duration::from_secs(original_ttl),
            hit_count: u64::try_from(row.hit_count).unwrap_or(0),
            key: row.cache_key,
        })
    }
}

/// Durable tier stored in the `api_cache` table.
#[derive(Clone)]
pub struct PostgresDurableStore {
    pool: PgPool,
}

impl PostgresDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DurableStore for PostgresDurableStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let row = sqlx::query_as::<_, ApiCacheRow>(SELECT_LIVE)
            .bind(key)
            .bind(OffsetDateTime::now_utc())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(CacheEntry::try_from).transpose()
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let response_json = entry
            .payload
            .to_value()
            .map_err(|err| StoreError::corrupt(Tier::Durable, &entry.key, err.to_string()))?;
        let original_ttl_seconds = i64::try_from(entry.original_ttl.as_secs()).unwrap_or(i64::MAX);

        sqlx::query(UPSERT)
            .bind(Uuid::new_v4())
            .bind(&entry.key)
            .bind(&entry.source)
            .bind(response_json)
            .bind(entry.expires_at)
            .bind(original_ttl_seconds)
            .bind(entry.created_at)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM api_cache WHERE cache_key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError> {
        let result = sqlx::query(r"DELETE FROM api_cache WHERE cache_key LIKE $1 ESCAPE '\'")
            .bind(pattern.to_sql_like())
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn record_hit(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_cache SET hit_count = hit_count + 1 WHERE cache_key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM api_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
