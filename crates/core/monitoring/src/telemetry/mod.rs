//! OpenTelemetry exporters and instrument wrappers.

pub mod metrics;
pub mod traces;

pub use opentelemetry_otlp::ExporterBuildError;
