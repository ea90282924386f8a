//! Configuration module for the relay worker
//!
//! Handles command-line arguments, configuration file parsing, and default
//! settings.

pub mod args;
pub mod settings;

pub use args::Args;
pub use settings::{Config, LoggingSettings, PolicySettings, WorkerSettings};

use anyhow::Result;
use tracing::{info, warn};

/// Load configuration from file or create default configuration
///
/// Attempts to load configuration from the specified file. If the file
/// doesn't exist, a default configuration file is written and the defaults
/// are returned.
pub async fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        match toml::de::from_str::<Config>(&config_str) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse config file {}: {}", args.config.display(), e);
                return Err(e.into());
            }
        }
    } else {
        warn!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );

        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(&args.config, config_str).await?;
        info!("Created default configuration file: {}", args.config.display());

        default_config
    };

    // Command-line overrides win over file settings.
    if let Some(listen) = &args.listen {
        config.worker.listen_addr = listen.clone();
    }
    if let Some(worker_id) = &args.worker_id {
        config.worker.worker_id = Some(worker_id.clone());
    }
    if let Some(max_connections) = args.max_connections {
        config.worker.max_connections = max_connections;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default();
        write!(file, "{}", toml::to_string_pretty(&config).unwrap()).unwrap();

        let args = Args {
            config: file.path().to_path_buf(),
            ..Args::default()
        };
        let loaded = load_config(&args).await.unwrap();
        assert_eq!(loaded.worker.listen_addr, config.worker.listen_addr);
    }

    #[tokio::test]
    async fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            toml::to_string_pretty(&Config::default()).unwrap()
        )
        .unwrap();

        let args = Args {
            config: file.path().to_path_buf(),
            listen: Some("0.0.0.0:9999".to_string()),
            worker_id: Some("w-override".to_string()),
            max_connections: Some(7),
            ..Args::default()
        };
        let loaded = load_config(&args).await.unwrap();
        assert_eq!(loaded.worker.listen_addr, "0.0.0.0:9999");
        assert_eq!(loaded.worker.worker_id.as_deref(), Some("w-override"));
        assert_eq!(loaded.worker.max_connections, 7);
    }

    #[tokio::test]
    async fn test_missing_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let args = Args {
            config: path.clone(),
            ..Args::default()
        };

        let loaded = load_config(&args).await.unwrap();
        assert!(path.exists());
        assert_eq!(loaded.worker.max_connections, 1000);
    }

    #[tokio::test]
    async fn test_invalid_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args {
            config: dir.path().join("config.toml"),
            worker_id: Some("bad:id".to_string()),
            ..Args::default()
        };
        assert!(load_config(&args).await.is_err());
    }
}
