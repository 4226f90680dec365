//! Store and provider doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bookbytes_cache::cache::{
    CacheConfig, CacheEntry, CacheService, DurableStore, HotStore, KeyPattern, Lookup,
    MemoryHotStore, Payload, ScanPage, StoreError, Tier,
};
use bookbytes_cache::provider::{ContentProvider, ProviderError};
use serde_json::json;
use time::OffsetDateTime;
use tokio::sync::Semaphore;

pub fn memory_hot() -> Arc<MemoryHotStore> {
    Arc::new(MemoryHotStore::new(
        NonZeroUsize::new(1_024).expect("capacity"),
        NonZeroUsize::new(4).expect("shards"),
    ))
}

pub fn cache_with(hot: Arc<dyn HotStore>, durable: Arc<dyn DurableStore>) -> Arc<CacheService> {
    Arc::new(CacheService::new(hot, durable, test_config()))
}

pub fn test_config() -> CacheConfig {
    CacheConfig {
        operation_timeout: Duration::from_millis(500),
        pattern_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(2),
        ..CacheConfig::default()
    }
}

pub fn book_payload(title: &str) -> Payload {
    Payload::from_value(&json!({ "title": title, "source_provider": "openlibrary" }))
}

/// A document that decodes as a `BookSearchResult`.
pub fn edition_payload(title: &str) -> Payload {
    Payload::from_value(&json!({
        "title": title,
        "isbn_list": ["9780261103344"],
        "external_work_key": "/works/OL27482W",
        "source_provider": "openlibrary"
    }))
}

/// Entry created `age` ago with `ttl` total lifetime.
pub fn aged_entry(key: &str, payload: Payload, ttl: Duration, age: Duration) -> CacheEntry {
    CacheEntry::new(
        key,
        payload,
        "ol",
        OffsetDateTime::now_utc() - age,
        ttl,
        ttl,
    )
}

/// In-memory durable tier with the same contract as the Postgres adapter.
#[derive(Default)]
pub struct RecordingDurableStore {
    rows: Mutex<HashMap<String, CacheEntry>>,
    upsert_delay: Option<Duration>,
    delete_delay: Option<Duration>,
    pub upserts: AtomicUsize,
    pub hits: AtomicUsize,
}

impl RecordingDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upsert_delay(delay: Duration) -> Self {
        Self {
            upsert_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Deletes (single and by pattern) take `delay` before touching rows.
    pub fn with_delete_delay(delay: Duration) -> Self {
        Self {
            delete_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn insert(&self, entry: CacheEntry) {
        self.rows
            .lock()
            .expect("rows lock")
            .insert(entry.key.clone(), entry);
    }

    pub fn row(&self, key: &str) -> Option<CacheEntry> {
        self.rows.lock().expect("rows lock").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("rows lock").len()
    }
}

#[async_trait]
impl DurableStore for RecordingDurableStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .rows
            .lock()
            .expect("rows lock")
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .cloned())
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        if let Some(delay) = self.upsert_delay {
            tokio::time::sleep(delay).await;
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().expect("rows lock");
        let newer_exists = rows
            .get(&entry.key)
            .is_some_and(|stored| stored.created_at > entry.created_at);
        if !newer_exists {
            rows.insert(entry.key.clone(), entry.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.rows.lock().expect("rows lock").remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError> {
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|key, _| !pattern.matches(key));
        Ok((before - rows.len()) as u64)
    }

    async fn record_hit(&self, key: &str) -> Result<(), StoreError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = self.rows.lock().expect("rows lock").get_mut(key) {
            entry.hit_count += 1;
        }
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|_, entry| !entry.is_expired(now));
        Ok((before - rows.len()) as u64)
    }

    fn backend(&self) -> &'static str {
        "recording"
    }
}

/// Durable tier whose writes never complete.
pub struct StalledDurableStore;

#[async_trait]
impl DurableStore for StalledDurableStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(None)
    }

    async fn upsert(&self, _entry: &CacheEntry) -> Result<(), StoreError> {
        std::future::pending::<()>().await;
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
        "stalled"
    }
}

/// Durable tier whose reads never complete.
pub struct HangingDurableStore;

#[async_trait]
impl DurableStore for HangingDurableStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        std::future::pending::<()>().await;
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
        "hanging"
    }
}

/// Durable tier that is unreachable.
pub struct DownDurableStore;

#[async_trait]
impl DurableStore for DownDurableStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Err(StoreError::durable_unavailable("connection refused"))
    }

    async fn upsert(&self, _entry: &CacheEntry) -> Result<(), StoreError> {
        Err(StoreError::durable_unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::durable_unavailable("connection refused"))
    }

    async fn delete_matching(&self, _pattern: &KeyPattern) -> Result<u64, StoreError> {
        Err(StoreError::durable_unavailable("connection refused"))
    }

    async fn record_hit(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::durable_unavailable("connection refused"))
    }

    async fn purge_expired(&self, _now: OffsetDateTime) -> Result<u64, StoreError> {
        Err(StoreError::durable_unavailable("connection refused"))
    }

    fn backend(&self) -> &'static str {
        "down"
    }
}

/// Hot tier that is unreachable.
pub struct DownHotStore;

#[async_trait]
impl HotStore for DownHotStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Err(StoreError::hot_unavailable("connection refused"))
    }

    async fn put(&self, _entry: CacheEntry) -> Result<(), StoreError> {
        Err(StoreError::hot_unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::hot_unavailable("connection refused"))
    }

    async fn scan(
        &self,
        _cursor: u64,
        _pattern: &KeyPattern,
        _count: usize,
    ) -> Result<ScanPage, StoreError> {
        Err(StoreError::hot_unavailable("connection refused"))
    }

    fn backend(&self) -> &'static str {
        "down"
    }
}

/// Hot tier holding one unreadable value; records deletes.
#[derive(Default)]
pub struct CorruptHotStore {
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl HotStore for CorruptHotStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let already_deleted = self
            .deleted
            .lock()
            .expect("deleted lock")
            .iter()
            .any(|deleted| deleted == key);
        if already_deleted {
            return Ok(None);
        }
        Err(StoreError::corrupt(Tier::Hot, key, "expected value"))
    }

    async fn put(&self, _entry: CacheEntry) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.deleted
            .lock()
            .expect("deleted lock")
            .push(key.to_string());
        Ok(true)
    }

    async fn scan(
        &self,
        _cursor: u64,
        _pattern: &KeyPattern,
        _count: usize,
    ) -> Result<ScanPage, StoreError> {
        Ok(ScanPage {
            next_cursor: 0,
            keys: Vec::new(),
        })
    }

    fn backend(&self) -> &'static str {
        "corrupt"
    }
}

#[derive(Clone)]
pub enum Scripted {
    Payload(Payload),
    Unavailable,
    NotFound,
}

/// Provider that counts fetches and can hold them behind a gate.
pub struct CountingProvider {
    pub calls: AtomicUsize,
    response: Mutex<Scripted>,
    gate: Option<Semaphore>,
}

impl CountingProvider {
    pub fn returning(payload: Payload) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Scripted::Payload(payload)),
            gate: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Scripted::Unavailable),
            gate: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Scripted::NotFound),
            gate: None,
        }
    }

    /// Fetches block until [`CountingProvider::open`] is called.
    pub fn gated(self) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..self
        }
    }

    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn set_response(&self, response: Scripted) {
        *self.response.lock().expect("response lock") = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for CountingProvider {
    fn name(&self) -> &str {
        "ol"
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<Payload, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate open");
        }
        let response = self.response.lock().expect("response lock").clone();
        match response {
            Scripted::Payload(payload) => Ok(payload),
            Scripted::Unavailable => Err(ProviderError::unavailable("upstream returned 503")),
            Scripted::NotFound => Err(ProviderError::NotFound {
                resource: lookup.key("ol"),
            }),
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
