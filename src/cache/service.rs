//! Two-tier cache orchestration.
//!
//! Reads go hot tier, then durable tier (repopulating the hot tier on a
//! durable hit). Writes land in the hot tier synchronously and reach the
//! durable tier through detached write-behind tasks. No store failure is ever
//! returned to the caller: a broken tier degrades to a miss.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::durable::DurableStore;
use super::entry::{CacheEntry, Payload};
use super::error::{StoreError, Tier};
use super::hot::HotStore;
use super::keys::{CacheCategory, LookupParams, build_key};
use super::metrics::{
    METRIC_BACKEND_ERROR, METRIC_INVALIDATED, METRIC_L1_HIT, METRIC_L1_MISS, METRIC_L2_HIT,
    METRIC_L2_MISS, METRIC_PENDING_WRITES,
};
use super::pattern::KeyPattern;
use super::policy::TtlPolicy;

const UNKNOWN_SOURCE: &str = "unknown";

/// Result of [`CacheService::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub payload: Option<Payload>,
    /// The entry is past the revalidation threshold and should be refreshed.
    pub needs_revalidation: bool,
    /// Tier that served the payload.
    pub tier: Option<Tier>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self {
            payload: None,
            needs_revalidation: false,
            tier: None,
        }
    }

    fn hit(payload: Payload, needs_revalidation: bool, tier: Tier) -> Self {
        Self {
            payload: Some(payload),
            needs_revalidation,
            tier: Some(tier),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.payload.is_some()
    }
}

/// Detached durable tasks still running, counted overall and per key.
///
/// Only write-behind upserts are tracked per key; hit counters only count
/// toward the total that shutdown waits on.
#[derive(Default)]
struct PendingWrites {
    count: AtomicUsize,
    by_key: DashMap<String, usize>,
    changed: Notify,
}

impl PendingWrites {
    fn begin(self: &Arc<Self>, key: Option<&str>) -> PendingGuard {
        let now = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!(METRIC_PENDING_WRITES).set(now as f64);
        if let Some(key) = key {
            *self.by_key.entry(key.to_string()).or_insert(0) += 1;
        }
        PendingGuard {
            pending: Arc::clone(self),
            key: key.map(str::to_string),
        }
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn is_writing(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    fn is_writing_matching(&self, pattern: &KeyPattern) -> bool {
        self.by_key.iter().any(|entry| pattern.matches(entry.key()))
    }

    /// Wait until no task is pending. Returns `false` if `limit` elapsed first.
    async fn wait_idle(&self, limit: Duration) -> bool {
        self.wait_until(limit, || self.len() == 0).await
    }

    async fn wait_until(&self, limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if done() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    fn finish(&self, key: Option<&str>) {
        if let Some(key) = key {
            if let Some(mut writes) = self.by_key.get_mut(key) {
                *writes = writes.saturating_sub(1);
            }
            self.by_key.remove_if(key, |_, writes| *writes == 0);
        }
        let left = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(METRIC_PENDING_WRITES).set(left as f64);
        self.changed.notify_waiters();
    }
}

struct PendingGuard {
    pending: Arc<PendingWrites>,
    key: Option<String>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.finish(self.key.as_deref());
    }
}

pub struct CacheService {
    hot: Arc<dyn HotStore>,
    durable: Arc<dyn DurableStore>,
    config: CacheConfig,
    pending: Arc<PendingWrites>,
    /// Bumped between the durable and hot deletes of every invalidation.
    invalidations: AtomicU64,
}

impl CacheService {
    pub fn new(hot: Arc<dyn HotStore>, durable: Arc<dyn DurableStore>, config: CacheConfig) -> Self {
        info!(
            hot_backend = hot.backend(),
            durable_backend = durable.backend(),
            operation_timeout_ms = config.operation_timeout_ms(),
            "Cache service initialized"
        );
        Self {
            hot,
            durable,
            config,
            pending: Arc::new(PendingWrites::default()),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.config.policy
    }

    pub fn build_key(&self, category: CacheCategory, provider: &str, params: &LookupParams) -> String {
        build_key(category, provider, params)
    }

    /// Look up `key`, serving stale-but-live entries with `needs_revalidation` set.
    pub async fn get(&self, key: &str) -> CacheLookup {
        let now = OffsetDateTime::now_utc();

        if let Some(entry) = self.hot_get(key).await {
            counter!(METRIC_L1_HIT).increment(1);
            let stale = self
                .policy()
                .needs_revalidation(entry.remaining(now), entry.original_ttl);
            debug!(cache_key = key, stale, "Hot tier hit");
            return CacheLookup::hit(entry.payload, stale, Tier::Hot);
        }
        counter!(METRIC_L1_MISS).increment(1);

        let generation = self.invalidations.load(Ordering::SeqCst);
        let Some(entry) = self.durable_get(key).await else {
            counter!(METRIC_L2_MISS).increment(1);
            return CacheLookup::miss();
        };
        counter!(METRIC_L2_HIT).increment(1);

        let remaining = entry.remaining(now);
        let stale = self
            .policy()
            .needs_revalidation(remaining, entry.original_ttl);
        let payload = entry.payload.clone();

        let mut copy = entry;
        copy.expires_at = now + self.policy().repopulation_ttl(remaining);
        copy.hit_count = 0;
        self.repopulate(key, copy, generation).await;
        self.spawn_record_hit(key);

        debug!(cache_key = key, stale, "Durable tier hit, hot tier repopulated");
        CacheLookup::hit(payload, stale, Tier::Durable)
    }

    /// Store `payload` under `key`.
    ///
    /// `base_ttl` of `None` picks the category default from the key prefix.
    /// The hot tier is written before returning; the durable tier is written
    /// by a detached task.
    pub async fn set(&self, key: &str, payload: Payload, base_ttl: Option<Duration>) {
        let base_ttl = base_ttl.unwrap_or_else(|| self.policy().ttl_for_key(key));
        let ttl = self.policy().jittered(base_ttl);
        let entry = CacheEntry::new(
            key,
            payload,
            source_of(key),
            OffsetDateTime::now_utc(),
            ttl,
            base_ttl,
        );

        if let Err(err) = self.bounded(Tier::Hot, "put", self.hot.put(entry.clone())).await {
            report_store_error("set", key, &err);
        }
        self.spawn_write_behind(entry);
    }

    /// Remove `key` from both tiers. Returns how many tiers held it.
    ///
    /// The durable row goes first so a concurrent durable hit cannot put the
    /// old payload back into the hot tier after it was cleared.
    pub async fn invalidate(&self, key: &str) -> u64 {
        let mut removed = 0;

        self.settle_write_behind(|| !self.pending.is_writing(key)).await;
        match self
            .bounded(Tier::Durable, "delete", self.durable.delete(key))
            .await
        {
            Ok(true) => {
                counter!(METRIC_INVALIDATED, "tier" => Tier::Durable.as_str()).increment(1);
                removed += 1;
            }
            Ok(false) => {}
            Err(err) => report_store_error("invalidate", key, &err),
        }

        self.invalidations.fetch_add(1, Ordering::SeqCst);
        match self.bounded(Tier::Hot, "delete", self.hot.delete(key)).await {
            Ok(true) => {
                counter!(METRIC_INVALIDATED, "tier" => Tier::Hot.as_str()).increment(1);
                removed += 1;
            }
            Ok(false) => {}
            Err(err) => report_store_error("invalidate", key, &err),
        }

        debug!(cache_key = key, removed, "Cache key invalidated");
        removed
    }

    /// Remove every key matching a Redis-style glob from both tiers.
    ///
    /// Returns the number of entries removed across tiers.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let pattern = KeyPattern::new(pattern);
        let limit = self.config.pattern_timeout;

        self.settle_write_behind(|| !self.pending.is_writing_matching(&pattern))
            .await;
        let durable_removed =
            match tokio::time::timeout(limit, self.durable.delete_matching(&pattern)).await {
                Ok(Ok(count)) => count,
                Ok(Err(err)) => {
                    report_store_error("invalidate_pattern", pattern.as_str(), &err);
                    0
                }
                Err(_) => {
                    report_store_error(
                        "invalidate_pattern",
                        pattern.as_str(),
                        &timeout_error(Tier::Durable, "delete_matching", limit),
                    );
                    0
                }
            };

        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let hot_removed =
            match tokio::time::timeout(limit, self.hot.delete_matching(&pattern)).await {
                Ok(Ok(count)) => count,
                Ok(Err(err)) => {
                    report_store_error("invalidate_pattern", pattern.as_str(), &err);
                    0
                }
                Err(_) => {
                    report_store_error(
                        "invalidate_pattern",
                        pattern.as_str(),
                        &timeout_error(Tier::Hot, "delete_matching", limit),
                    );
                    0
                }
            };

        counter!(METRIC_INVALIDATED, "tier" => Tier::Hot.as_str()).increment(hot_removed);
        counter!(METRIC_INVALIDATED, "tier" => Tier::Durable.as_str()).increment(durable_removed);
        info!(
            pattern = pattern.as_str(),
            hot_removed, durable_removed, "Cache pattern invalidated"
        );
        hot_removed + durable_removed
    }

    /// Delete expired durable rows.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let limit = self.config.pattern_timeout;
        tokio::time::timeout(limit, self.durable.purge_expired(OffsetDateTime::now_utc()))
            .await
            .map_err(|_| timeout_error(Tier::Durable, "purge_expired", limit))?
    }

    /// Number of write-behind tasks still running.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Wait (bounded by the shutdown timeout) for pending durable writes.
    ///
    /// Returns `true` if everything was flushed.
    pub async fn shutdown(&self) -> bool {
        let pending = self.pending.len();
        let flushed = self.pending.wait_idle(self.config.shutdown_timeout).await;
        if flushed {
            info!(pending, "Cache write-behind flushed");
        } else {
            warn!(
                pending,
                left = self.pending.len(),
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Cache shutdown timed out with pending durable writes"
            );
        }
        flushed
    }

    /// Wait (bounded by the operation timeout) for in-flight upserts of the
    /// keys about to be invalidated.
    async fn settle_write_behind(&self, settled: impl FnMut() -> bool) {
        if !self.pending.wait_until(self.config.operation_timeout, settled).await {
            warn!(
                timeout_ms = self.config.operation_timeout_ms(),
                "Invalidation proceeding with durable writes still pending"
            );
        }
    }

    /// Put a durable hit back into the hot tier unless an invalidation ran
    /// since `generation` was read; the copy is then dropped again.
    async fn repopulate(&self, key: &str, copy: CacheEntry, generation: u64) {
        if self.invalidations.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Err(err) = self.bounded(Tier::Hot, "put", self.hot.put(copy)).await {
            report_store_error("repopulate", key, &err);
            return;
        }
        if self.invalidations.load(Ordering::SeqCst) != generation {
            debug!(cache_key = key, "Invalidation raced repopulation, dropping copy");
            if let Err(err) = self.bounded(Tier::Hot, "delete", self.hot.delete(key)).await {
                report_store_error("repopulate", key, &err);
            }
        }
    }

    async fn hot_get(&self, key: &str) -> Option<CacheEntry> {
        match self.bounded(Tier::Hot, "get", self.hot.get(key)).await {
            Ok(entry) => entry,
            Err(err) => {
                report_store_error("get", key, &err);
                if err.is_corrupt() {
                    self.discard_corrupt(key).await;
                }
                None
            }
        }
    }

    async fn durable_get(&self, key: &str) -> Option<CacheEntry> {
        match self.bounded(Tier::Durable, "get", self.durable.get(key)).await {
            Ok(entry) => entry,
            Err(err) => {
                report_store_error("get", key, &err);
                if err.is_corrupt() {
                    if let Err(err) = self
                        .bounded(Tier::Durable, "delete", self.durable.delete(key))
                        .await
                    {
                        report_store_error("discard_corrupt", key, &err);
                    }
                }
                None
            }
        }
    }

    async fn discard_corrupt(&self, key: &str) {
        match self.bounded(Tier::Hot, "delete", self.hot.delete(key)).await {
            Ok(_) => warn!(cache_key = key, "Discarded corrupt hot entry"),
            Err(err) => report_store_error("discard_corrupt", key, &err),
        }
    }

    fn spawn_write_behind(&self, entry: CacheEntry) {
        let durable = Arc::clone(&self.durable);
        let limit = self.config.operation_timeout;
        let guard = self.pending.begin(Some(&entry.key));
        tokio::spawn(async move {
            let _guard = guard;
            let result = match tokio::time::timeout(limit, durable.upsert(&entry)).await {
                Ok(result) => result,
                Err(_) => Err(timeout_error(Tier::Durable, "upsert", limit)),
            };
            match result {
                Ok(()) => debug!(cache_key = %entry.key, "Durable write-behind complete"),
                Err(err) => report_store_error("write_behind", &entry.key, &err),
            }
        });
    }

    fn spawn_record_hit(&self, key: &str) {
        let durable = Arc::clone(&self.durable);
        let limit = self.config.operation_timeout;
        let key = key.to_string();
        let guard = self.pending.begin(None);
        tokio::spawn(async move {
            let _guard = guard;
            if let Ok(Err(err)) = tokio::time::timeout(limit, durable.record_hit(&key)).await {
                report_store_error("record_hit", &key, &err);
            }
        });
    }

    async fn bounded<T>(
        &self,
        tier: Tier,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = self.config.operation_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(tier, op, limit)),
        }
    }
}

fn timeout_error(tier: Tier, op: &'static str, limit: Duration) -> StoreError {
    StoreError::Timeout {
        tier,
        op,
        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
}

fn report_store_error(op: &'static str, key: &str, err: &StoreError) {
    counter!(
        METRIC_BACKEND_ERROR,
        "tier" => err.tier().as_str(),
        "kind" => err.kind()
    )
    .increment(1);
    warn!(
        op,
        cache_key = key,
        tier = err.tier().as_str(),
        error = %err,
        "Cache backend degraded"
    );
}

/// Provider tag embedded in a key (`<category>:<provider>:<digest>`).
fn source_of(key: &str) -> &str {
    key.split(':')
        .nth(1)
        .filter(|tag| !tag.is_empty())
        .unwrap_or(UNKNOWN_SOURCE)
}
