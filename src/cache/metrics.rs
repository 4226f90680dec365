//! Metric names emitted by the cache and provider layers.

pub const METRIC_L1_HIT: &str = "bookbytes_cache_l1_hit_total";
pub const METRIC_L1_MISS: &str = "bookbytes_cache_l1_miss_total";
pub const METRIC_L1_EVICT: &str = "bookbytes_cache_l1_evict_total";
pub const METRIC_L2_HIT: &str = "bookbytes_cache_l2_hit_total";
pub const METRIC_L2_MISS: &str = "bookbytes_cache_l2_miss_total";
pub const METRIC_BACKEND_ERROR: &str = "bookbytes_cache_backend_error_total";
pub const METRIC_REVALIDATION: &str = "bookbytes_cache_revalidation_total";
pub const METRIC_INVALIDATED: &str = "bookbytes_cache_invalidated_total";
pub const METRIC_PENDING_WRITES: &str = "bookbytes_cache_pending_writes";
pub const METRIC_PROVIDER_FETCH_MS: &str = "bookbytes_provider_fetch_ms";
