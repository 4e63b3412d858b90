use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {message}")]
pub struct TelemetryError {
    message: String,
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
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
        .map_err(|err| TelemetryError {
            message: err.to_string(),
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "strato_cache_hit_total",
            Unit::Count,
            "Total number of cache entry hits."
        );
        describe_counter!(
            "strato_cache_miss_total",
            Unit::Count,
            "Total number of cache entry misses, including decode failures."
        );
        describe_counter!(
            "strato_cache_write_error_total",
            Unit::Count,
            "Total number of cache writes that failed and were swallowed."
        );
        describe_counter!(
            "strato_cache_revalidated_keys_total",
            Unit::Count,
            "Total number of cache entries removed by tag revalidation."
        );
        describe_counter!(
            "strato_edge_purge_failure_total",
            Unit::Count,
            "Total number of edge purge calls that failed or returned an error status."
        );
        describe_histogram!(
            "strato_edge_purge_ms",
            Unit::Milliseconds,
            "Edge purge call latency in milliseconds."
        );
    });
}
