//! Bus envelope and payload wire types.
//!
//! Every message crossing a worker boundary is wrapped in an [`Envelope`]
//! with the wire shape `{ "type": string, "src": workerID, "payload": any }`.
//! The payload is an opaque JSON value at the envelope layer; the typed
//! payload structs in this module give the router a checked view of it on
//! both sides of the wire.

use crate::types::{InstanceId, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kinds of envelope the instance managers exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// Point-to-point delivery of a message to a connection hosted by the
    /// target worker.
    Route,
    /// Fan-out request: deliver to the local shard of an instance on every
    /// worker that has one.
    RouteBroadcast,
    /// An instance was unregistered by its originating worker; drop any
    /// local shard and cached knowledge of it.
    InstanceRemoved,
    /// A routed message could not be delivered; notify the originating
    /// connection.
    RouteFailed,
}

/// One message on the bus wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind, serialized as the `type` field.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// The worker that published this envelope.
    pub src: WorkerId,
    /// Kind-specific payload.
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, src: WorkerId, payload: Value) -> Self {
        Self { kind, src, payload }
    }
}

/// Payload of [`EnvelopeKind::Route`].
///
/// Addresses travel in raw string form; the receiving router parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePayload {
    /// Raw address of the target connection, as read from the directory.
    pub address: String,
    /// The application message to deliver.
    pub message: Value,
    /// Raw address of the connection the request originated from, for
    /// failure reporting.
    pub source: String,
}

/// Payload of [`EnvelopeKind::RouteBroadcast`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    /// The distributed instance to broadcast on.
    pub instance: InstanceId,
    /// The application message to deliver to every member.
    pub message: Value,
    /// Raw address of the broadcasting connection. The sender is excluded
    /// only on the worker that hosts it; every other shard delivers to all
    /// of its members.
    pub source: String,
}

/// Payload of [`EnvelopeKind::InstanceRemoved`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRemovedPayload {
    pub instance: InstanceId,
}

/// Payload of [`EnvelopeKind::RouteFailed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailurePayload {
    /// Raw address of the connection to notify.
    pub address: String,
    /// The original message that could not be delivered.
    pub message: Value,
    /// Human-readable description of what went wrong.
    pub error: String,
}
