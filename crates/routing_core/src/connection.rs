//! The routing facet of a client connection.
//!
//! A [`Connection`] owns identity, address and pause/close state, nothing
//! else. Actual byte I/O lives behind the [`ConnectionWriter`] seam, which
//! the transport adapter (TCP, UDP, WebSocket) implements. The routing core
//! never touches a socket.
//!
//! Connections are exclusively owned by the instance manager of the worker
//! that accepted them. Other workers only ever see the serialized address.

use crate::address::Address;
use crate::error::RoutingError;
use crate::types::{ConnectionId, InstanceId, WorkerId};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outbound byte delivery, implemented by the transport adapter.
#[async_trait]
pub trait ConnectionWriter: Send + Sync {
    /// Delivers a serialized message to the client.
    async fn deliver(&self, payload: &[u8]) -> Result<(), RoutingError>;

    /// Closes the underlying transport. Idempotent.
    async fn close(&self);
}

/// The addressable, transport-agnostic handle for one client connection.
///
/// The address is mutated in place only in its instance segment, on room
/// join and leave; worker and connection segments never change after
/// creation.
pub struct Connection {
    id: ConnectionId,
    address: RwLock<Address>,
    paused: AtomicBool,
    closed: AtomicBool,
    writer: Arc<dyn ConnectionWriter>,
}

impl Connection {
    /// Creates the routing facet for a newly accepted transport connection,
    /// assigning a fresh process-unique id. The instance segment starts
    /// unjoined.
    pub fn new(worker: &WorkerId, writer: Arc<dyn ConnectionWriter>) -> Arc<Self> {
        let id = ConnectionId::generate();
        let address = Address::new(worker.clone(), InstanceId::unjoined(), id.clone());
        Arc::new(Self {
            id,
            address: RwLock::new(address),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            writer,
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current address (copy).
    pub async fn address(&self) -> Address {
        self.address.read().await.clone()
    }

    /// Current address in raw wire form, as stored in the directory.
    pub async fn raw_address(&self) -> String {
        self.address.read().await.to_string()
    }

    /// Rewrites the instance segment on join/leave.
    pub(crate) async fn set_instance(&self, instance: InstanceId) {
        let mut address = self.address.write().await;
        *address = address.with_instance(instance);
    }

    /// Suppresses outbound delivery until [`resume`](Self::resume).
    /// Membership and the directory entry are unaffected.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the connection closed and clears the instance segment. All
    /// further routing to it fails with `ConnectionNotFound`.
    pub(crate) async fn invalidate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_instance(InstanceId::unjoined()).await;
    }

    /// Serializes and delivers a message to the client.
    ///
    /// A paused connection swallows the message; a closed one rejects it.
    pub async fn send(&self, message: &Value) -> Result<(), RoutingError> {
        if self.is_closed() {
            return Err(RoutingError::ConnectionNotFound(self.id.clone()));
        }
        if self.is_paused() {
            return Ok(());
        }
        let bytes = serde_json::to_vec(message)?;
        self.writer.deliver(&bytes).await
    }

    /// Closes the transport via the writer seam.
    pub(crate) async fn close_writer(&self) {
        self.writer.close().await;
    }
}
