//! Cron job deleting expired rows from the durable cache tier.

use std::str::FromStr;

use apalis::prelude::*;
use apalis_cron::Schedule;

use super::context::{JobWorkerContext, job_failed};

/// Hourly, at second 0 of minute 0.
pub const DEFAULT_PURGE_SCHEDULE: &str = "0 0 * * * *";

/// Marker struct for the cron-triggered purge.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct PurgeExpiredCacheJob;

impl From<chrono::DateTime<chrono::Utc>> for PurgeExpiredCacheJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_purge_expired_cache_job(
    _job: PurgeExpiredCacheJob,
    ctx: Data<JobWorkerContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.cache.purge_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(purged_count = count, "Purged expired cache rows");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to purge expired cache rows");
            Err(job_failed(err))
        }
    }
}

/// Parse the purge cron expression (seconds-resolution, six or seven fields).
pub fn purge_expired_schedule(expression: &str) -> Result<Schedule, String> {
    Schedule::from_str(expression).map_err(|err| err.to_string())
}
