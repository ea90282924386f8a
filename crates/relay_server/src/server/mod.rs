//! Server assembly: wires the routing core to this worker's configuration
//! and lifecycle.

mod core;

pub use core::{RelayServer, ServerConfig, ServerError};
