//! # Core Type Definitions
//!
//! Identifier types shared by every component of the routing core. The three
//! id kinds mirror the three segments of an [`Address`](crate::Address):
//!
//! - [`WorkerId`] - one worker process in the cluster
//! - [`InstanceId`] - a named room (or a generated id for anonymous rooms)
//! - [`ConnectionId`] - a single client connection, unique per process
//!
//! All three are string-backed wrappers rather than raw strings so they
//! cannot be confused with each other at call sites. They serialize
//! transparently as strings, which is the form they take inside the shared
//! directory and on the bus wire.
//!
//! Identifier strings must not contain `:`, the address segment
//! separator. Generated ids (uuid v4) never do; application-chosen room
//! names are the caller's responsibility.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a worker process in the cluster.
///
/// Worker ids are assigned by whatever supervises the worker processes
/// (config, process index, hostname). The routing core only requires that
/// they are unique across the cluster and stable for the worker's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Wraps an externally-assigned worker id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a logical room ("instance").
///
/// Instance ids double as the hash keys of the shared directory, so every
/// worker in the cluster resolves the same name to the same directory entry.
/// The empty id is reserved for the "not yet joined" address state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps an application-chosen room name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generates an id for an anonymous room.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The reserved empty id used in the instance segment of an address
    /// whose connection has not joined any room.
    pub fn unjoined() -> Self {
        Self(String::new())
    }

    /// True for the reserved "not joined" id.
    pub fn is_unjoined(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a single client connection.
///
/// Generated at accept time by the worker that owns the connection. Other
/// workers only ever see the id inside a serialized address; the connection
/// object itself never crosses a process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps an id parsed off the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh process-unique connection id (uuid v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection left the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Client closed the transport (normal disconnect)
    ClientDisconnect,
    /// The worker closed the connection (kick, shutdown)
    ServerClose,
    /// Transport or routing error forced the close
    Error(String),
}

/// Returns the current Unix timestamp in seconds.
///
/// Used for lifecycle notifications and failure reports so timestamps are
/// consistent across the codebase.
///
/// # Panics
///
/// Panics if the system clock is set before the Unix epoch, which does not
/// happen on any system this runs on.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_connection_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn unjoined_instance_id_is_empty() {
        let id = InstanceId::unjoined();
        assert!(id.is_unjoined());
        assert_eq!(id.as_str(), "");
        assert!(!InstanceId::new("lobby").is_unjoined());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let worker = WorkerId::new("w1");
        let json = serde_json::to_value(&worker).unwrap();
        assert_eq!(json, serde_json::json!("w1"));
    }

    #[test]
    fn timestamp_is_nonzero() {
        assert!(current_timestamp() > 0);
    }
}
