//! Logging setup on top of tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use opentelemetry::trace::TracerProvider as _;
use tracing_subscriber::{
    self, EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::telemetry;

static HMS_LOG_ENV_VAR: &str = "HMS_LOG";

/// Initializes a tracing subscriber for logging.
pub fn init() {
    // Also used to enable logging in tests, so wrap in `Once` to prevent
    // multiple initializations.
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, log_level) = env_filter_and_log_level();

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::info!("log level: {}", log_level);
    });
}

/// Initializes a tracing subscriber for logging with OpenTelemetry tracing support.
pub fn init_with_telemetry(url: &str, trace_ratio: f64) -> telemetry::traces::Result {
    let (env_filter, log_level) = env_filter_and_log_level();

    let (telemetry_layer, traces_provider) = {
        let tracer_provider = telemetry::traces::provider(url, trace_ratio)?;
        let tracer = tracer_provider.tracer("hms-tracer");
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        (telemetry_layer, tracer_provider)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();

    tracing::info!("log level: {}", log_level);

    Ok(traces_provider)
}

/// Renders an error's source chain for structured log fields.
pub fn error_source(err: &dyn std::error::Error) -> String {
    let mut out = String::new();
    let mut source = err.source();
    while let Some(src) = source {
        if !out.is_empty() {
            out.push_str(": ");
        }
        out.push_str(&src.to_string());
        source = src.source();
    }
    out
}

/// List of crates in the workspace.
const HMS_CRATES: &[&str] = &["config", "db_pool", "monitoring", "shard_router"];

fn env_filter_and_log_level() -> (EnvFilter, String) {
    // Parse directives from RUST_LOG
    let log_filter = EnvFilter::builder().with_default_directive(LevelFilter::ERROR.into());
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = log_filter.parse(&directive_string).unwrap();

    let log_level = std::env::var(HMS_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());

    for crate_name in HMS_CRATES {
        // Add directives for each crate in HMS_CRATES, if not overridden by RUST_LOG
        if !directive_string.contains(&format!("{crate_name}=")) {
            env_filter =
                env_filter.add_directive(format!("{crate_name}={log_level}").parse().unwrap());
        }
    }

    (env_filter, log_level)
}

/// If this fails, just update the above `HMS_CRATES` to match reality.
#[test]
fn assert_hms_crates() {
    use cargo_metadata::MetadataCommand;

    let cmd = MetadataCommand::new().exec().unwrap();
    let mut names: Vec<String> = cmd
        .workspace_packages()
        .into_iter()
        .map(|pkg| pkg.name.replace("-", "_").clone())
        .collect();
    names.sort();
    assert_eq!(names, HMS_CRATES);
}

#[test]
fn error_source_renders_chain() {
    use std::fmt;

    #[derive(Debug)]
    struct Leaf;
    impl fmt::Display for Leaf {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "leaf failure")
        }
    }
    impl std::error::Error for Leaf {}

    #[derive(Debug)]
    struct Outer(Leaf);
    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failure")
        }
    }
    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    assert_eq!(error_source(&Outer(Leaf)), "leaf failure");
    assert_eq!(error_source(&Leaf), "");
}
