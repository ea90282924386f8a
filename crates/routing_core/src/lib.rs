//! # Routing Core
//!
//! A connection-routing layer for horizontally scaled real-time servers.
//! Clients connect to any worker process; rooms (instances) live wherever
//! they were first created; this crate makes the seams invisible by
//! resolving every `(instance, connection)` pair to either a local delivery
//! or exactly one message over the transport bus.
//!
//! ## Core Features
//!
//! - **Location-transparent delivery**: send to a connection id without
//!   knowing which worker holds its socket
//! - **Atomic room ownership**: the shared directory's check-and-create is
//!   the only coordination primitive, so a creation race has exactly one
//!   winner and no split-brain rooms
//! - **Sharded membership**: each worker holds an [`Instance`] shard for
//!   its own members; broadcasts fan out once per worker, not per member
//! - **Failure notification**: an undeliverable message is reported back to
//!   the connection that sent it, across workers if needed
//! - **Degraded mode**: losing the bus or directory makes the worker reject
//!   new routing work fast instead of queueing into a dead backend
//!
//! ## Architecture Overview
//!
//! Three layers, each behind a trait seam:
//!
//! - [`MessageBus`] carries [`Envelope`]s between workers. [`BusHub`] is
//!   the in-process implementation and doubles as the test harness.
//! - [`SharedDirectory`] maps `(instance, connection)` to the full
//!   `worker:instance:connection` [`Address`]. [`InMemoryDirectory`] is
//!   the single-process implementation.
//! - [`InstanceManager`] is the per-worker router built on both: it owns
//!   local [`Instance`] shards and [`Connection`]s and drains the inbound
//!   bus channel.
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use routing_core::{BusHub, InMemoryDirectory, InstanceManager, RouterPolicy, WorkerId};
//!
//! # async fn run(writer: std::sync::Arc<dyn routing_core::ConnectionWriter>) -> Result<(), routing_core::RoutingError> {
//! let hub = BusHub::new();
//! let directory = InMemoryDirectory::new();
//!
//! let (bus, inbox) = hub.attach(WorkerId::new("worker-1"));
//! let manager = InstanceManager::new(bus, directory, RouterPolicy::default()).await?;
//! manager.start(inbox);
//!
//! // Every accepted connection starts in the worker's lobby.
//! let connection = manager.accept(writer).await?;
//! manager.join(&connection, routing_core::InstanceId::new("arena-7")).await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod bus;
pub mod connection;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod events;
pub mod instance;
pub mod manager;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use address::Address;
pub use bus::{BusHub, MessageBus, WorkerBus};
pub use connection::{Connection, ConnectionWriter};
pub use directory::{InMemoryDirectory, SharedDirectory};
pub use envelope::{
    BroadcastPayload, DeliveryFailurePayload, Envelope, EnvelopeKind, InstanceRemovedPayload,
    RoutePayload,
};
pub use error::RoutingError;
pub use events::RoomObserver;
pub use instance::Instance;
pub use manager::{InstanceManager, RegisterOutcome, RouterPolicy};
pub use types::{current_timestamp, ConnectionId, DisconnectReason, InstanceId, WorkerId};
