//! Cache invalidation driven by the content pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{CacheCategory, CacheService, Lookup};

/// Identifiers of an entity whose durable record was just finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedEntity {
    /// Provider work key, e.g. `/works/OL27448W`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_key: Option<String>,
    #[serde(default)]
    pub isbns: Vec<String>,
}

impl FinalizedEntity {
    pub fn is_empty(&self) -> bool {
        self.work_key.is_none() && self.isbns.is_empty()
    }
}

/// Called by the content pipeline after it finalizes an entity.
#[async_trait]
pub trait InvalidationHook: Send + Sync {
    /// Drop cached results that may describe `entity`. Returns entries removed.
    async fn on_entity_finalized(&self, entity: &FinalizedEntity) -> u64;
}

/// Invalidates every search result plus the entity's own ISBN and work keys.
#[derive(Clone)]
pub struct CacheInvalidationHook {
    cache: Arc<CacheService>,
    provider_tag: String,
}

impl CacheInvalidationHook {
    pub fn new(cache: Arc<CacheService>, provider_tag: impl Into<String>) -> Self {
        Self {
            cache,
            provider_tag: provider_tag.into(),
        }
    }

    /// Exact keys owned by `entity` under this hook's provider.
    pub fn keys_for(&self, entity: &FinalizedEntity) -> Vec<String> {
        entity
            .isbns
            .iter()
            .map(|isbn| Lookup::isbn(isbn))
            .chain(entity.work_key.as_deref().map(Lookup::work))
            .filter(|lookup| !lookup.params().is_empty())
            .map(|lookup| lookup.key(&self.provider_tag))
            .collect()
    }
}

#[async_trait]
impl InvalidationHook for CacheInvalidationHook {
    async fn on_entity_finalized(&self, entity: &FinalizedEntity) -> u64 {
        let mut removed = self
            .cache
            .invalidate_pattern(&CacheCategory::Search.pattern(None))
            .await;
        for key in self.keys_for(entity) {
            removed += self.cache.invalidate(&key).await;
        }
        info!(
            work_key = entity.work_key.as_deref().unwrap_or("-"),
            isbn_count = entity.isbns.len(),
            removed,
            "Invalidated cache for finalized entity"
        );
        removed
    }
}
