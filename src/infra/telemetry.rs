use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::render::{
    METRIC_ANNOTATION_ATTACHED, METRIC_ANNOTATION_STALE, METRIC_COMPILE_CACHE_HIT,
    METRIC_COMPILE_CACHE_MISS, METRIC_COMPILE_FAILURE,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so that stdout stays reserved for command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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
            METRIC_COMPILE_CACHE_HIT,
            Unit::Count,
            "Fragments resolved from the on-disk artifact cache."
        );
        describe_counter!(
            METRIC_COMPILE_CACHE_MISS,
            Unit::Count,
            "Fragments that required an external compiler run."
        );
        describe_counter!(
            METRIC_COMPILE_FAILURE,
            Unit::Count,
            "Compiler runs that produced no artifact."
        );
        describe_counter!(
            METRIC_ANNOTATION_ATTACHED,
            Unit::Count,
            "Rendered artifacts attached to the document."
        );
        describe_counter!(
            METRIC_ANNOTATION_STALE,
            Unit::Count,
            "Rendered artifacts discarded because their span changed."
        );
    });
}
