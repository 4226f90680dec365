//! Cache configuration.
//!
//! Freshness policy and backend timeouts, built from the `[cache]` section
//! of `bookbytes.toml`.

use std::time::Duration;

use super::policy::TtlPolicy;

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_PATTERN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub policy: TtlPolicy,
    /// Bound on every single-key hot/durable call.
    pub operation_timeout: Duration,
    /// Bound on one tier's share of a pattern invalidation.
    pub pattern_timeout: Duration,
    /// How long shutdown waits for write-behind tasks.
    pub shutdown_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: TtlPolicy::default(),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            pattern_timeout: Duration::from_millis(DEFAULT_PATTERN_TIMEOUT_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            policy: TtlPolicy {
                search_ttl: Duration::from_secs(settings.search_ttl_secs.get()),
                isbn_ttl: Duration::from_secs(settings.isbn_ttl_secs.get()),
                work_ttl: Duration::from_secs(settings.work_ttl_secs.get()),
                revalidate_threshold: settings.revalidate_threshold,
                jitter_ratio: settings.jitter_ratio,
            },
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms.get()),
            pattern_timeout: Duration::from_millis(settings.pattern_timeout_ms.get()),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms.get()),
        }
    }
}

impl CacheConfig {
    pub fn operation_timeout_ms(&self) -> u64 {
        u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
