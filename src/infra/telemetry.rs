use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_BACKEND_ERROR, METRIC_INVALIDATED, METRIC_L1_EVICT, METRIC_L1_HIT, METRIC_L1_MISS,
    METRIC_L2_HIT, METRIC_L2_MISS, METRIC_PENDING_WRITES, METRIC_PROVIDER_FETCH_MS,
    METRIC_REVALIDATION,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_L1_HIT,
            Unit::Count,
            "Total number of hot-store hits."
        );
        describe_counter!(
            METRIC_L1_MISS,
            Unit::Count,
            "Total number of hot-store misses, including expired and unreadable entries."
        );
        describe_counter!(
            METRIC_L1_EVICT,
            Unit::Count,
            "Total number of in-process hot-store evictions due to capacity."
        );
        describe_counter!(
            METRIC_L2_HIT,
            Unit::Count,
            "Total number of durable-store hits that repopulated the hot store."
        );
        describe_counter!(
            METRIC_L2_MISS,
            Unit::Count,
            "Total number of durable-store misses."
        );
        describe_counter!(
            METRIC_BACKEND_ERROR,
            Unit::Count,
            "Total number of cache backend failures, labelled by tier and kind."
        );
        describe_counter!(
            METRIC_REVALIDATION,
            Unit::Count,
            "Background revalidations, labelled by outcome."
        );
        describe_counter!(
            METRIC_INVALIDATED,
            Unit::Count,
            "Total number of cache entries removed by invalidation."
        );
        describe_gauge!(
            METRIC_PENDING_WRITES,
            Unit::Count,
            "Write-behind tasks still persisting to the durable store."
        );
        describe_histogram!(
            METRIC_PROVIDER_FETCH_MS,
            Unit::Milliseconds,
            "Upstream provider fetch latency in milliseconds."
        );
    });
}
