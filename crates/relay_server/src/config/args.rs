//! Command-line argument parsing
//!
//! Defines the command-line interface for the relay worker using the clap
//! crate. Every flag overrides the corresponding configuration file setting.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for a relay worker process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// Specifies the path to the TOML configuration file.
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Server listen address
    ///
    /// Override the listen address from the configuration file.
    /// Format: "IP:PORT" (e.g., "127.0.0.1:8080" or "0.0.0.0:3000")
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Worker identifier
    ///
    /// Override the worker id from the configuration file. Worker ids must
    /// be unique per cluster and must not contain ':'. When neither the
    /// flag nor the file provides one, a random id is generated.
    #[arg(short, long)]
    pub worker_id: Option<String>,

    /// Enable debug logging
    ///
    /// When enabled, sets the logging level to debug, providing more
    /// detailed output for troubleshooting.
    #[arg(short, long)]
    pub debug: bool,

    /// Maximum number of connections
    ///
    /// Override the connection limit from the configuration file.
    #[arg(long)]
    pub max_connections: Option<usize>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.toml"),
            listen: None,
            worker_id: None,
            debug: false,
            max_connections: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::default();
        assert_eq!(args.config, PathBuf::from("config.toml"));
        assert!(!args.debug);
        assert!(args.listen.is_none());
        assert!(args.worker_id.is_none());
        assert!(args.max_connections.is_none());
    }
}
