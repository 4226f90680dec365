mod cache;
mod context;
mod purge_expired;

pub use cache::{
    CACHE_INVALIDATION_NAMESPACE, CacheInvalidationJobPayload, enqueue_cache_invalidation_job,
    process_cache_invalidation_job,
};
pub use context::{JobWorkerContext, job_failed};
pub use purge_expired::{
    DEFAULT_PURGE_SCHEDULE, PurgeExpiredCacheJob, process_purge_expired_cache_job,
    purge_expired_schedule,
};
