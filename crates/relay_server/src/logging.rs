//! Logging system setup and configuration
//!
//! Initializes the tracing-based logging stack used throughout the worker.
//! The filter is driven by the config file, overridden by the `--debug`
//! flag, overridden in turn by `RUST_LOG`.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Args, Config};

/// Initialize the logging system
///
/// Sets up structured logging with configurable output format and
/// filtering. Safe to call exactly once per process.
///
/// # Environment Variables
/// * `RUST_LOG` - Override the configured filter (e.g., "debug",
///   "routing_core=trace")
pub fn setup_logging(args: &Args, config: &Config) -> Result<()> {
    let configured = config
        .logging
        .as_ref()
        .map(|l| l.level.as_str())
        .unwrap_or("info");
    let level = if args.debug { "debug" } else { configured };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_format = config
        .logging
        .as_ref()
        .map(|l| l.json_format)
        .unwrap_or(false);

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}
