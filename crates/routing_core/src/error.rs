//! Error taxonomy for the routing core.
//!
//! Routing failures come in two very different flavors and the variants keep
//! them apart: local, recoverable conditions (`MalformedAddress`,
//! `ConnectionNotFound`) that are resolved by reporting back to the
//! originating connection, and backend connectivity loss
//! (`BusUnavailable`, `DirectoryUnavailable`) that degrades the whole worker
//! until the supervisor restores the backend.
//!
//! Losing the registration race for a room name is *not* an error; it is
//! the [`RegisterOutcome::HostedElsewhere`](crate::RegisterOutcome) variant.

use crate::types::ConnectionId;

/// Errors produced by routing operations.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// An address string did not have exactly three `:`-separated segments.
    /// Always local and synchronous; the operation is rejected, nothing
    /// crashes.
    #[error("malformed address: {0:?}")]
    MalformedAddress(String),

    /// The routing target exists neither locally nor in the shared
    /// directory. Reported back to the originating connection as a
    /// delivery-failure notification, never surfaced as a fatal error.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The pub/sub backend connection is down. All sends and broadcasts
    /// fail fast until an external supervisor reconnects the backend.
    #[error("message bus unavailable: {0}")]
    BusUnavailable(String),

    /// The shared key-value backend is down. New joins and routed sends are
    /// rejected until connectivity is restored.
    #[error("shared directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A payload or envelope could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RoutingError {
    /// True for the backend-connectivity variants that put the owning
    /// worker into degraded mode.
    pub fn is_backend_loss(&self) -> bool {
        matches!(
            self,
            RoutingError::BusUnavailable(_) | RoutingError::DirectoryUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for RoutingError {
    fn from(err: serde_json::Error) -> Self {
        RoutingError::Serialization(err.to_string())
    }
}
