use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
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

/// Registers descriptions for every metric the engine emits. Safe to call
/// more than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "inertia_ssr_cache_hit_total",
            Unit::Count,
            "Total number of SSR fragment cache hits."
        );
        describe_counter!(
            "inertia_ssr_cache_miss_total",
            Unit::Count,
            "Total number of SSR fragment cache misses, expired entries included."
        );
        describe_counter!(
            "inertia_ssr_cache_evict_total",
            Unit::Count,
            "Total number of SSR fragment evictions due to capacity."
        );
        describe_counter!(
            "inertia_ssr_retry_total",
            Unit::Count,
            "Total number of SSR request retries."
        );
        describe_histogram!(
            "inertia_ssr_render_ms",
            Unit::Milliseconds,
            "SSR render latency in milliseconds, cache hits included."
        );
        describe_counter!(
            "inertia_prop_failure_total",
            Unit::Count,
            "Total number of lazy props omitted because their resolver failed."
        );
    });
}
