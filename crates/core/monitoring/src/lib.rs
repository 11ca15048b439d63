//! Logging and telemetry plumbing shared by the data-layer crates.

use opentelemetry::metrics::Meter;

pub mod config;
pub mod logging;
pub mod telemetry;

use self::{
    config::OpenTelemetryConfig,
    telemetry::{
        metrics::{self, MeterProvider},
        traces::TracerProvider,
    },
};

/// Handles returned by [`init`].
///
/// The provider fields are RAII guards: dropping them flushes and shuts down
/// the corresponding OpenTelemetry exporter. Keep this struct alive for the
/// lifetime of the process.
pub struct Telemetry {
    /// Trace exporter guard, present when a trace collector URL is configured.
    pub traces: Option<TracerProvider>,
    /// Metrics exporter guard, present when a metrics collector URL is configured.
    pub metrics: Option<MeterProvider>,
    /// Meter for building instruments, present when metrics are enabled.
    pub meter: Option<Meter>,
}

/// Initializes logging and, when configured, the OpenTelemetry exporters.
///
/// With no config (or with neither collector URL set) this only installs the
/// log subscriber and returns an empty [`Telemetry`].
pub fn init(
    config: Option<&OpenTelemetryConfig>,
) -> Result<Telemetry, telemetry::ExporterBuildError> {
    let Some(config) = config else {
        logging::init();
        return Ok(Telemetry {
            traces: None,
            metrics: None,
            meter: None,
        });
    };

    let traces = match config.trace_url.as_deref() {
        Some(url) => Some(logging::init_with_telemetry(url, config.trace_ratio)?),
        None => {
            logging::init();
            None
        }
    };

    let (metrics, meter) = match config.metrics_url.as_deref() {
        Some(url) => {
            let (provider, meter) = metrics::start(url, config.metrics_export_interval)?;
            (Some(provider), Some(meter))
        }
        None => (None, None),
    };

    Ok(Telemetry {
        traces,
        metrics,
        meter,
    })
}
