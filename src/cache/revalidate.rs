//! Per-key single-flight background refresh.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use metrics::{counter, histogram};
use tracing::{Instrument, debug, info_span, warn};

use super::keys::Lookup;
use super::metrics::{METRIC_PROVIDER_FETCH_MS, METRIC_REVALIDATION};
use super::service::CacheService;
use crate::provider::ContentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// A refresh task was started for the key.
    Spawned,
    /// A refresh for the key is already running; nothing was started.
    AlreadyInFlight,
}

/// Coalesces refresh requests so each key has at most one provider fetch in
/// flight in this process.
///
/// Refresh tasks are detached: dropping the request that triggered one does
/// not cancel it. A failed fetch leaves the stale entry where it is.
#[derive(Clone)]
pub struct RevalidationCoordinator {
    cache: Arc<CacheService>,
    provider: Arc<dyn ContentProvider>,
    in_flight: Arc<DashMap<String, ()>>,
}

impl RevalidationCoordinator {
    pub fn new(cache: Arc<CacheService>, provider: Arc<dyn ContentProvider>) -> Self {
        Self {
            cache,
            provider,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Start a background refresh of `lookup` unless one is already running.
    pub fn request(&self, lookup: &Lookup) -> RevalidationOutcome {
        let key = lookup.key(self.provider.name());
        let Some(guard) = self.acquire(&key) else {
            counter!(METRIC_REVALIDATION, "outcome" => "coalesced").increment(1);
            debug!(cache_key = %key, "Revalidation already in flight");
            return RevalidationOutcome::AlreadyInFlight;
        };
        counter!(METRIC_REVALIDATION, "outcome" => "spawned").increment(1);

        let cache = Arc::clone(&self.cache);
        let provider = Arc::clone(&self.provider);
        let lookup = lookup.clone();
        let span = info_span!("revalidate", cache_key = %key, category = %lookup.category());
        tokio::spawn(
            async move {
                let _guard = guard;
                refresh(&cache, provider.as_ref(), &key, &lookup).await;
            }
            .instrument(span),
        );
        RevalidationOutcome::Spawned
    }

    fn acquire(&self, key: &str) -> Option<RefreshGuard> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(RefreshGuard {
                    key: key.to_string(),
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
            Entry::Occupied(_) => None,
        }
    }
}

async fn refresh(cache: &CacheService, provider: &dyn ContentProvider, key: &str, lookup: &Lookup) {
    let started = Instant::now();
    let result = provider.fetch(lookup).await;
    histogram!(METRIC_PROVIDER_FETCH_MS, "provider" => provider.name().to_string())
        .record(started.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(payload) => {
            let base_ttl = cache.policy().category_ttl(lookup.category());
            cache.set(key, payload, Some(base_ttl)).await;
            counter!(METRIC_REVALIDATION, "outcome" => "refreshed").increment(1);
            debug!(cache_key = key, "Revalidation stored fresh payload");
        }
        Err(err) => {
            counter!(METRIC_REVALIDATION, "outcome" => "failed").increment(1);
            warn!(
                cache_key = key,
                error = %err,
                "Revalidation fetch failed, keeping stale entry"
            );
        }
    }
}

/// Clears the in-flight marker when the refresh task ends, panics included.
struct RefreshGuard {
    key: String,
    in_flight: Arc<DashMap<String, ()>>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}
