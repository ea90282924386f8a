//! # Relay Server
//!
//! The worker process shell around [`routing_core`]: configuration loading,
//! logging setup, graceful shutdown, and the [`RelayServer`] type that wires
//! an instance manager to this process's backends and limits.
//!
//! The transport itself (WebSocket, TCP framing) is out of scope here;
//! transports plug in by implementing
//! [`routing_core::ConnectionWriter`] and handing accepted sockets to
//! [`RelayServer::accept`].

pub mod config;
pub mod logging;
pub mod server;
pub mod shutdown;

pub use config::{Args, Config};
pub use server::{RelayServer, ServerConfig, ServerError};
