//! OpenTelemetry exporter settings.

use std::time::Duration;

use serde::Deserialize;

/// Collector endpoints and sampling settings for telemetry export.
///
/// Both URLs are optional; leaving one unset disables that exporter.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenTelemetryConfig {
    /// Metrics collector endpoint. Metrics are exported over binary HTTP.
    pub metrics_url: Option<String>,
    /// How often to export metrics, in seconds. Only used when
    /// `metrics_url` is set; the exporter default applies when absent.
    #[serde(
        default,
        rename = "metrics_export_interval_secs",
        deserialize_with = "opt_duration_from_secs"
    )]
    pub metrics_export_interval: Option<Duration>,
    /// Traces collector endpoint. Traces are exported over HTTP.
    pub trace_url: Option<String>,
    /// Fraction of traces to sample, 0.0 to 1.0 (default: 1.0).
    ///
    /// Only used when `trace_url` is set.
    #[serde(default = "default_trace_ratio")]
    pub trace_ratio: f64,
}

fn default_trace_ratio() -> f64 {
    1.0
}

fn opt_duration_from_secs<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<f64>>::deserialize(deserializer).map(|option| option.map(Duration::from_secs_f64))
}
