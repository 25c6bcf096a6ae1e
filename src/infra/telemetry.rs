use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cachet_cache_hit_total",
            Unit::Count,
            "Reads served from the cache."
        );
        describe_counter!(
            "cachet_cache_miss_total",
            Unit::Count,
            "Reads that found no usable cached value."
        );
        describe_counter!(
            "cachet_cache_expired_total",
            Unit::Count,
            "Entries dropped on read because their TTL had elapsed."
        );
        describe_counter!(
            "cachet_cache_capacity_evict_total",
            Unit::Count,
            "Entries evicted from the in-memory store to make room."
        );
        describe_counter!(
            "cachet_cache_store_error_total",
            Unit::Count,
            "Cache store get/set failures, labelled by op."
        );
        describe_counter!(
            "cachet_cache_owner_reject_total",
            Unit::Count,
            "Cache hits withheld because the caller does not own the entry."
        );
        describe_counter!(
            "cachet_cache_invalidate_total",
            Unit::Count,
            "Cache keys deleted after a mutation."
        );
        describe_counter!(
            "cachet_cache_invalidate_failed_total",
            Unit::Count,
            "Cache deletes that failed and left an entry to expire by TTL."
        );
        describe_gauge!(
            "cachet_cache_list_staleness_bound_ms",
            Unit::Milliseconds,
            "Longest a list under an uncommon query shape may stay stale after a write."
        );
    });
}
