use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Logs go to stderr so a document streamed to stdout stays clean.
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
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_render_total",
            Unit::Count,
            "Total number of render requests, labelled by backend and outcome."
        );
        describe_histogram!(
            "pressroom_render_ms",
            Unit::Milliseconds,
            "End-to-end render latency in milliseconds."
        );
        describe_histogram!(
            "pressroom_document_bytes",
            Unit::Bytes,
            "Size of produced PDF documents."
        );
        describe_counter!(
            "pressroom_renderer_launch_total",
            Unit::Count,
            "Total number of headless renderer processes launched."
        );
        describe_counter!(
            "pressroom_connect_attempts_total",
            Unit::Count,
            "Total number of control-channel connection attempts."
        );
        describe_gauge!(
            "pressroom_renderers_running",
            Unit::Count,
            "Headless renderer processes currently alive."
        );
        describe_counter!(
            "pressroom_print_passes_total",
            Unit::Count,
            "Total number of print commands issued, including pagination reprints."
        );
    });
}
