//! Cache-fronted book metadata lookups.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{
    CacheService, Lookup, LookupParams, Payload, RevalidationCoordinator,
    metrics::METRIC_PROVIDER_FETCH_MS,
};
use crate::provider::{BookSearchResult, ContentProvider, SearchResponse, WorkDetails};

use super::error::LookupError;

/// Search fields accepted by [`BookLookupService::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub title: String,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub offset: u64,
}

impl SearchQuery {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn to_lookup(&self) -> Lookup {
        let offset = (self.offset > 0).then(|| self.offset.to_string());
        Lookup::search(
            LookupParams::new()
                .with("title", &self.title)
                .with_opt("author", self.author.as_deref())
                .with_opt("publisher", self.publisher.as_deref())
                .with_opt("language", self.language.as_deref())
                .with_opt("offset", offset),
        )
    }
}

/// Serves lookups from the cache, going to the provider only on a cold miss.
///
/// Stale hits are returned immediately and refreshed in the background.
#[derive(Clone)]
pub struct BookLookupService {
    cache: Arc<CacheService>,
    provider: Arc<dyn ContentProvider>,
    revalidator: RevalidationCoordinator,
}

impl BookLookupService {
    pub fn new(cache: Arc<CacheService>, provider: Arc<dyn ContentProvider>) -> Self {
        let revalidator = RevalidationCoordinator::new(Arc::clone(&cache), Arc::clone(&provider));
        Self {
            cache,
            provider,
            revalidator,
        }
    }

    pub fn revalidator(&self) -> &RevalidationCoordinator {
        &self.revalidator
    }

    pub async fn lookup(&self, lookup: &Lookup) -> Result<Payload, LookupError> {
        let key = lookup.key(self.provider.name());
        if let Some(payload) = self.cached(lookup, &key).await {
            return Ok(payload);
        }
        self.fetch_and_store(lookup, &key).await
    }

    async fn cached(&self, lookup: &Lookup, key: &str) -> Option<Payload> {
        let cached = self.cache.get(key).await;
        if cached.is_hit() && cached.needs_revalidation {
            self.revalidator.request(lookup);
        }
        cached.payload
    }

    async fn fetch_and_store(&self, lookup: &Lookup, key: &str) -> Result<Payload, LookupError> {
        debug!(cache_key = %key, "Cold miss, fetching from provider");
        let started = Instant::now();
        let fetched = self.provider.fetch(lookup).await;
        histogram!(METRIC_PROVIDER_FETCH_MS, "provider" => self.provider.name().to_string())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let payload = fetched?;
        let base_ttl = self.cache.policy().category_ttl(lookup.category());
        self.cache.set(key, payload.clone(), Some(base_ttl)).await;
        Ok(payload)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, LookupError> {
        self.lookup_as(&query.to_lookup()).await
    }

    pub async fn book_by_isbn(&self, isbn: &str) -> Result<BookSearchResult, LookupError> {
        self.lookup_as(&Lookup::isbn(isbn)).await
    }

    pub async fn work(&self, work_key: &str) -> Result<WorkDetails, LookupError> {
        self.lookup_as(&Lookup::work(work_key)).await
    }

    /// Every ISBN the provider lists for a work.
    pub async fn isbns_for_work(&self, work_key: &str) -> Result<Vec<String>, LookupError> {
        Ok(self.work(work_key).await?.isbn_list)
    }

    /// Decode a lookup into `T`.
    ///
    /// A cached document of the wrong shape is treated as corrupt: it is
    /// invalidated and the lookup falls through to the provider.
    async fn lookup_as<T: DeserializeOwned>(&self, lookup: &Lookup) -> Result<T, LookupError> {
        let key = lookup.key(self.provider.name());
        if let Some(payload) = self.cached(lookup, &key).await {
            match payload.decode() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(cache_key = %key, error = %err, "Discarding undecodable cached document");
                    self.cache.invalidate(&key).await;
                }
            }
        }

        let payload = self.fetch_and_store(lookup, &key).await?;
        payload.decode().map_err(|err| LookupError::Decode {
            key,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_maps_to_normalized_lookup() {
        let query = SearchQuery {
            title: "  The Hobbit ".to_string(),
            author: Some("Tolkien".to_string()),
            publisher: Some("   ".to_string()),
            language: None,
            offset: 0,
        };
        let lookup = query.to_lookup();
        assert_eq!(lookup.params().canonical(), "author=tolkien&title=the hobbit");

        let paged = SearchQuery {
            offset: 100,
            ..query
        };
        assert_ne!(paged.to_lookup().key("ol"), lookup.key("ol"));
    }
}
