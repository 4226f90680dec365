use apalis::prelude::{Data, Error as ApalisError, Storage};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::invalidation::FinalizedEntity;

use super::context::JobWorkerContext;

/// Queue namespace for invalidation jobs in the apalis Postgres storage.
pub const CACHE_INVALIDATION_NAMESPACE: &str = "bookbytes::cache_invalidation";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidationJobPayload {
    pub entity: FinalizedEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Enqueue a cache invalidation for a finalized entity.
/// Fire-and-forget; the pipeline does not wait for the worker.
pub async fn enqueue_cache_invalidation_job<S>(
    storage: &mut S,
    entity: FinalizedEntity,
    reason: Option<String>,
) -> Result<(), S::Error>
where
    S: Storage<Job = CacheInvalidationJobPayload>,
{
    storage
        .push(CacheInvalidationJobPayload { entity, reason })
        .await
        .map(|_| ())
}

/// Run the invalidation hook for a finalized entity.
pub async fn process_cache_invalidation_job(
    payload: CacheInvalidationJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;

    info!(
        target = "application::jobs::process_cache_invalidation_job",
        reason = payload.reason.as_deref().unwrap_or("unspecified"),
        work_key = payload.entity.work_key.as_deref().unwrap_or("-"),
        "starting cache invalidation"
    );

    let removed = ctx.invalidation.on_entity_finalized(&payload.entity).await;

    info!(
        target = "application::jobs::process_cache_invalidation_job",
        removed, "cache invalidation completed"
    );
    Ok(())
}
