//! Cluster-wide connection addresses.
//!
//! An [`Address`] names a connection anywhere in the cluster as the triple
//! `(worker, instance, connection)`, with the canonical string form
//! `worker:instance:connection`. The string form is what lives in the shared
//! directory and inside bus payloads; the parsed form is what the router
//! works with.
//!
//! Parsing is pure and total over well-formed input: any string with exactly
//! three `:`-separated segments parses, and empty segments are legal (an
//! empty instance segment means "not yet joined"). Anything else is a
//! [`RoutingError::MalformedAddress`].

use crate::error::RoutingError;
use crate::types::{ConnectionId, InstanceId, WorkerId};
use serde::{Deserialize, Serialize};

/// A `(worker, instance, connection)` triple identifying a connection
/// system-wide.
///
/// Addresses are immutable values; "moving" a connection between rooms is
/// expressed with [`Address::with_instance`], which returns a new value. The
/// worker and connection segments of a live connection never change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// The worker process that owns the connection.
    pub worker: WorkerId,
    /// The room the connection is currently joined to (may be unjoined).
    pub instance: InstanceId,
    /// The connection itself.
    pub connection: ConnectionId,
}

impl Address {
    pub fn new(worker: WorkerId, instance: InstanceId, connection: ConnectionId) -> Self {
        Self {
            worker,
            instance,
            connection,
        }
    }

    /// Parses the canonical `worker:instance:connection` form.
    ///
    /// Empty segments are permitted; a segment count other than three is a
    /// construction error.
    pub fn parse(raw: &str) -> Result<Self, RoutingError> {
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() != 3 {
            return Err(RoutingError::MalformedAddress(raw.to_string()));
        }
        Ok(Self {
            worker: WorkerId::new(segments[0]),
            instance: InstanceId::new(segments[1]),
            connection: ConnectionId::new(segments[2]),
        })
    }

    /// Returns a copy of this address pointing at a different instance.
    pub fn with_instance(&self, instance: InstanceId) -> Self {
        Self {
            worker: self.worker.clone(),
            instance,
            connection: self.connection.clone(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.worker, self.instance, self.connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string_form() {
        let addr = Address::new(
            WorkerId::new("w-3"),
            InstanceId::new("arena"),
            ConnectionId::new("c-17"),
        );
        let parsed = Address::parse(&addr.to_string()).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn empty_segments_are_permitted() {
        let addr = Address::parse("w1::c1").unwrap();
        assert!(addr.instance.is_unjoined());

        let all_empty = Address::parse("::").unwrap();
        assert_eq!(all_empty.to_string(), "::");
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        for raw in ["", "w1", "w1:i1", "w1:i1:c1:extra"] {
            match Address::parse(raw) {
                Err(RoutingError::MalformedAddress(s)) => assert_eq!(s, raw),
                other => panic!("expected MalformedAddress for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn with_instance_is_pure() {
        let addr = Address::parse("w1:lobby:c1").unwrap();
        let moved = addr.with_instance(InstanceId::new("arena"));
        assert_eq!(addr.instance, InstanceId::new("lobby"));
        assert_eq!(moved.instance, InstanceId::new("arena"));
        assert_eq!(moved.worker, addr.worker);
        assert_eq!(moved.connection, addr.connection);
    }
}
