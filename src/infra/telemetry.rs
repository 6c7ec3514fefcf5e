use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::render::{
        METRIC_BATCHES_TOTAL, METRIC_DOCUMENT_MS, METRIC_DOCUMENTS_TOTAL,
        METRIC_STAGE_TIMEOUTS_TOTAL,
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Installs the process-wide subscriber. Events go to stderr; `RUST_LOG`
/// directives refine the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(level_filter(logging))
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn level_filter(logging: &LoggingSettings) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy()
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_BATCHES_TOTAL,
            Unit::Count,
            "Total number of render batches opened."
        );
        describe_counter!(
            METRIC_DOCUMENTS_TOTAL,
            Unit::Count,
            "Total number of document renders by result (ok, failed, cancelled)."
        );
        describe_counter!(
            METRIC_STAGE_TIMEOUTS_TOTAL,
            Unit::Count,
            "Total number of render stages that exceeded their budget, by stage and criticality."
        );
        describe_histogram!(
            METRIC_DOCUMENT_MS,
            Unit::Milliseconds,
            "Per-document render latency in milliseconds."
        );
    });
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn configured_level_is_the_default_directive() {
        let logging = LoggingSettings {
            level: LevelFilter::DEBUG,
            format: LogFormat::Compact,
        };
        let filter = level_filter(&logging);
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
        }
    }
}
