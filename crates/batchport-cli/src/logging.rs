//! Logging setup.

use anyhow::Result;
use batchport_sched::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output.
    Console,
    /// JSON structured logging.
    Json,
}

impl TracingFormat {
    fn parse(s: &str) -> Self {
        match s {
            "json" => TracingFormat::Json,
            _ => TracingFormat::Console,
        }
    }
}

/// Filter for a `-v` count; zero keeps the configured level.
pub fn level_for(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable. `RUST_LOG` wins over the level when set.
pub fn init_tracing(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let level = level_for(verbose, &config.level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let fmt_layer = match TracingFormat::parse(&config.format) {
        TracingFormat::Console => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        TracingFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}
