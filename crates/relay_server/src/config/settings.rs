//! Configuration settings structures
//!
//! Defines the configuration tree a relay worker reads from its TOML file:
//! worker identity and limits, routing policy knobs, and optional logging
//! overrides.

use serde::{Deserialize, Serialize};

/// Main configuration structure
///
/// Root configuration object, serialized to/from TOML.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Worker-specific settings
    pub worker: WorkerSettings,
    /// Routing policy settings
    pub policy: PolicySettings,
    /// Optional logging configuration
    pub logging: Option<LoggingSettings>,
}

/// Worker process settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkerSettings {
    /// Network address to bind the worker to
    ///
    /// Format: "IP:PORT" (e.g., "127.0.0.1:8080" for localhost,
    /// "0.0.0.0:8080" for all interfaces)
    pub listen_addr: String,

    /// Stable worker identifier, unique per cluster
    ///
    /// Must not contain ':' since it forms the first segment of every
    /// connection address. Leave unset to generate a random id at startup.
    pub worker_id: Option<String>,

    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

/// Routing policy knobs
///
/// Mirrors [`routing_core::RouterPolicy`]; kept separate so the TOML shape
/// stays stable independently of the library type.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PolicySettings {
    /// Name prefix for the per-worker default instance
    pub default_instance: String,

    /// Keep instances registered after their last member leaves
    pub retain_empty_instances: bool,

    /// Return connections to the lobby when they leave a room
    pub fallback_to_lobby: bool,

    /// Remember a connection's previous room on leave so a reconnecting
    /// client can be routed back into it (only meaningful when
    /// `fallback_to_lobby` is false)
    pub allow_rejoin: bool,
}

/// Logging system configuration
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Logging level filter
    ///
    /// Valid values: "trace", "debug", "info", "warn", "error"
    pub level: String,

    /// Enable JSON-formatted log output
    pub json_format: bool,
}

impl Default for Config {
    /// Defaults suitable for a single-worker development setup.
    fn default() -> Self {
        Self {
            worker: WorkerSettings {
                listen_addr: "127.0.0.1:8080".to_string(),
                worker_id: None,
                max_connections: 1000,
            },
            policy: PolicySettings {
                default_instance: "__lobby".to_string(),
                retain_empty_instances: true,
                fallback_to_lobby: true,
                allow_rejoin: false,
            },
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            }),
        }
    }
}

impl Config {
    /// Validates the parts of the configuration that would otherwise fail
    /// much later and more confusingly.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .worker
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!("Invalid listen address: {}", self.worker.listen_addr));
        }

        if let Some(id) = &self.worker.worker_id {
            if id.is_empty() || id.contains(':') {
                return Err(format!(
                    "Invalid worker id {:?}: must be non-empty and must not contain ':'",
                    id
                ));
            }
        }

        if self.policy.default_instance.is_empty() || self.policy.default_instance.contains(':') {
            return Err(format!(
                "Invalid default instance name {:?}: must be non-empty and must not contain ':'",
                self.policy.default_instance
            ));
        }

        if let Some(logging) = &self.logging {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if !valid_levels.contains(&logging.level.as_str()) {
                return Err(format!(
                    "Invalid log level: {}. Must be one of: {:?}",
                    logging.level, valid_levels
                ));
            }
        }

        Ok(())
    }
}
