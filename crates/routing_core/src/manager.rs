//! The per-worker instance registry and cross-process router.
//!
//! One [`InstanceManager`] exists per worker process. It owns every local
//! instance shard and every local connection, and it is the only component
//! that talks to both coordination backends: the shared directory (who
//! lives where) and the transport bus (how to reach them).
//!
//! There is no ambient global here; the manager is constructed once per
//! worker and handed by reference to whatever needs to route.
//!
//! ## Room creation vs. shard creation
//!
//! [`register`](InstanceManager::register) is the explicit "host this room
//! here" operation. It runs the atomic directory check-and-create; exactly
//! one worker in a creation race wins, and the loser gets
//! [`RegisterOutcome::HostedElsewhere`] and never materializes a competing
//! instance object. Shards, by contrast, come into existence implicitly on
//! whichever worker a member [`join`](InstanceManager::join)s from, since
//! local membership is always held by the worker that owns the connection.
//!
//! ## Degraded mode
//!
//! Losing either backend flips the manager into a degraded state: new
//! joins, sends and broadcasts are rejected fast with the backend error,
//! while in-flight local operations complete. The manager never attempts
//! reconnection itself; the supervisor calls
//! [`restore`](InstanceManager::restore) once connectivity is back.

use crate::address::Address;
use crate::bus::MessageBus;
use crate::connection::{Connection, ConnectionWriter};
use crate::directory::SharedDirectory;
use crate::envelope::{
    BroadcastPayload, DeliveryFailurePayload, Envelope, EnvelopeKind, InstanceRemovedPayload,
    RoutePayload,
};
use crate::error::RoutingError;
use crate::events::{ObserverSet, RoomObserver};
use crate::instance::Instance;
use crate::types::{ConnectionId, DisconnectReason, InstanceId, WorkerId};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of [`InstanceManager::register`].
#[derive(Clone)]
pub enum RegisterOutcome {
    /// This worker hosts the room; here is the local instance.
    Local(Arc<Instance>),
    /// Another worker won the creation race. Not an error: route to the
    /// room's members by address instead of holding a local object.
    HostedElsewhere(InstanceId),
}

impl RegisterOutcome {
    pub fn local(&self) -> Option<&Arc<Instance>> {
        match self {
            RegisterOutcome::Local(instance) => Some(instance),
            RegisterOutcome::HostedElsewhere(_) => None,
        }
    }
}

/// Caller-controlled routing policy knobs.
#[derive(Debug, Clone)]
pub struct RouterPolicy {
    /// Name prefix of the per-worker default (lobby) instance every
    /// accepted connection starts in.
    pub default_instance: String,
    /// Keep instances alive after their last member leaves. When false,
    /// non-lobby instances are unregistered as soon as they empty.
    pub retain_empty_instances: bool,
    /// Put a connection back into the lobby when its room drops it,
    /// instead of leaving it unjoined.
    pub fallback_to_lobby: bool,
    /// Keep the instance segment of a connection's address when it leaves
    /// a room without falling back to the lobby, so the worker can route
    /// the client back into its previous room on reconnect. Irrelevant
    /// when `fallback_to_lobby` is set; a closed connection is always
    /// invalidated either way.
    pub allow_rejoin: bool,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            default_instance: "__lobby".to_string(),
            retain_empty_instances: true,
            fallback_to_lobby: true,
            allow_rejoin: false,
        }
    }
}

/// The router: per-worker registry of local instances plus the logic that
/// resolves any `(instance, connection)` pair to a local delivery or a bus
/// send.
pub struct InstanceManager {
    worker_id: WorkerId,
    bus: Arc<dyn MessageBus>,
    directory: Arc<dyn SharedDirectory>,
    local_instances: DashMap<InstanceId, Arc<Instance>>,
    /// Every connection accepted on this worker, across all instances.
    connections: DashMap<ConnectionId, Arc<Connection>>,
    observers: Arc<ObserverSet>,
    policy: RouterPolicy,
    lobby_id: InstanceId,
    degraded: AtomicBool,
}

impl InstanceManager {
    /// Builds the manager for one worker and registers its lobby instance.
    ///
    /// The lobby id is worker-scoped (`<prefix>-<worker>`) so every worker
    /// can host its own default instance without fighting over one
    /// directory key.
    pub async fn new(
        bus: Arc<dyn MessageBus>,
        directory: Arc<dyn SharedDirectory>,
        policy: RouterPolicy,
    ) -> Result<Arc<Self>, RoutingError> {
        let worker_id = bus.worker_id().clone();
        let lobby_id = InstanceId::new(format!("{}-{}", policy.default_instance, worker_id));
        let manager = Arc::new(Self {
            worker_id,
            bus,
            directory: directory.clone(),
            local_instances: DashMap::new(),
            connections: DashMap::new(),
            observers: Arc::new(ObserverSet::new()),
            policy,
            lobby_id: lobby_id.clone(),
            degraded: AtomicBool::new(false),
        });

        let created = directory.register_instance(&lobby_id).await?;
        if !created {
            // Stale key from a previous incarnation of this worker; the
            // address entries below it are dead and get overwritten as
            // connections arrive.
            warn!("lobby {} already present in directory, reusing key", lobby_id);
        }
        let lobby = Instance::new(
            lobby_id.clone(),
            manager.directory.clone(),
            manager.observers.clone(),
        );
        manager.local_instances.insert(lobby_id, lobby);
        info!("instance manager ready on worker {}", manager.worker_id);
        Ok(manager)
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn lobby_id(&self) -> &InstanceId {
        &self.lobby_id
    }

    /// Registers a lifecycle observer for every instance on this worker.
    pub async fn add_observer(&self, observer: Arc<dyn RoomObserver>) {
        self.observers.register(observer).await;
    }

    /// Spawns the inbound bus dispatch task. Call once per worker with the
    /// receiver obtained when attaching to the bus.
    pub fn start(self: &Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                manager.dispatch(envelope).await;
            }
            debug!("bus inbox closed on worker {}", manager.worker_id);
        })
    }

    /// Looks at a local instance by id.
    pub fn local_instance(&self, instance: &InstanceId) -> Option<Arc<Instance>> {
        self.local_instances.get(instance).map(|entry| entry.clone())
    }

    /// A connection accepted on this worker, by id.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.clone())
    }

    /// Number of connections currently accepted on this worker.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Explicitly hosts a room on this worker.
    ///
    /// Idempotent locally: re-registering a name this worker already hosts
    /// returns the existing instance without touching the directory. A name
    /// created first by another worker yields
    /// [`RegisterOutcome::HostedElsewhere`]; this worker then routes to it
    /// purely by address and never builds a competing object.
    pub async fn register(&self, name: InstanceId) -> Result<RegisterOutcome, RoutingError> {
        if let Some(existing) = self.local_instance(&name) {
            return Ok(RegisterOutcome::Local(existing));
        }
        self.check_available()?;

        let created = self.guard(self.directory.register_instance(&name).await)?;
        if !created {
            debug!("instance {} already hosted elsewhere", name);
            return Ok(RegisterOutcome::HostedElsewhere(name));
        }

        let instance = Instance::new(name.clone(), self.directory.clone(), self.observers.clone());
        let instance = self
            .local_instances
            .entry(name)
            .or_insert(instance)
            .clone();
        Ok(RegisterOutcome::Local(instance))
    }

    /// Takes ownership of a freshly accepted transport connection: assigns
    /// id and address, records it, and places it into the lobby.
    pub async fn accept(
        &self,
        writer: Arc<dyn ConnectionWriter>,
    ) -> Result<Arc<Connection>, RoutingError> {
        self.check_available()?;
        let connection = Connection::new(&self.worker_id, writer);
        self.connections
            .insert(connection.id().clone(), connection.clone());

        if let Some(lobby) = self.local_instance(&self.lobby_id) {
            if let Err(err) = lobby.add_connection(connection.clone()).await {
                self.note_backend_loss(&err);
            }
        }
        info!("👋 connection {} accepted on {}", connection.id(), self.worker_id);
        Ok(connection)
    }

    /// Moves a connection into a named room.
    ///
    /// Joining the room it is already in is a no-op. Otherwise the current
    /// membership (if any) is left first (a connection belongs to at most
    /// one instance at a time) and a local shard of the target room is
    /// created on demand for this worker's members.
    pub async fn join(
        &self,
        connection: &Arc<Connection>,
        name: InstanceId,
    ) -> Result<(), RoutingError> {
        if connection.is_closed() {
            return Err(RoutingError::ConnectionNotFound(connection.id().clone()));
        }
        self.check_available()?;

        let current = connection.address().await.instance;
        if current == name {
            // The address may name a room the connection is no longer a
            // member of (allow_rejoin keeps the segment on leave); only an
            // actual member makes the join a no-op.
            if let Some(shard) = self.local_instance(&name) {
                if shard.contains(connection.id()) {
                    return Ok(());
                }
            }
        }

        self.detach(connection, &current).await?;

        let shard = self.shard(&name).await?;
        self.guard(shard.add_connection(connection.clone()).await)?;
        debug!("connection {} joined {}", connection.id(), name);
        Ok(())
    }

    /// Removes a connection from its current room. Depending on policy the
    /// connection falls back into the lobby or is left unjoined.
    pub async fn leave(&self, connection: &Arc<Connection>) -> Result<(), RoutingError> {
        if connection.is_closed() {
            return Err(RoutingError::ConnectionNotFound(connection.id().clone()));
        }
        self.check_available()?;

        let current = connection.address().await.instance;
        self.detach(connection, &current).await?;

        if self.policy.fallback_to_lobby {
            if let Some(lobby) = self.local_instance(&self.lobby_id) {
                self.guard(lobby.add_connection(connection.clone()).await)?;
                return Ok(());
            }
        }
        if !self.policy.allow_rejoin {
            connection.set_instance(InstanceId::unjoined()).await;
        }
        Ok(())
    }

    /// Routes a message to a connection whose hosting worker may be
    /// unknown.
    ///
    /// Resolution order: local member of the named instance (no bus
    /// traffic), then the shared directory. A directory hit naming this
    /// worker handles the lag case where the target moved shards locally;
    /// a hit naming another worker becomes exactly one bus send. Absence
    /// everywhere is reported to `source` as a delivery failure, never an
    /// unwound error.
    pub async fn route_message(
        &self,
        target: &ConnectionId,
        message: &Value,
        within: &InstanceId,
        source: &Address,
    ) -> Result<(), RoutingError> {
        self.check_available()?;

        // Local fast path.
        if let Some(shard) = self.local_instance(within) {
            if shard.contains(target) {
                if let Err(err) = shard.send(target, message).await {
                    self.report_delivery_failure(source, message, &err).await;
                }
                return Ok(());
            }
        }

        let raw = match self.guard(self.directory.get_connection(within, target).await)? {
            Some(raw) => raw,
            None => {
                let err = RoutingError::ConnectionNotFound(target.clone());
                self.report_delivery_failure(source, message, &err).await;
                return Ok(());
            }
        };

        let target_addr = match Address::parse(&raw) {
            Ok(addr) => addr,
            Err(err) => {
                self.report_delivery_failure(source, message, &err).await;
                return Ok(());
            }
        };

        if target_addr.worker == self.worker_id {
            // Directory lag: the entry still names us, the member recently
            // moved shards locally.
            let outcome = match self.local_instance(&target_addr.instance) {
                Some(shard) => shard.send(target, message).await,
                None => Err(RoutingError::ConnectionNotFound(target.clone())),
            };
            if let Err(err) = outcome {
                self.report_delivery_failure(source, message, &err).await;
            }
            return Ok(());
        }

        let payload = serde_json::to_value(RoutePayload {
            address: raw,
            message: message.clone(),
            source: source.to_string(),
        })?;
        self.guard(
            self.bus
                .send(EnvelopeKind::Route, &target_addr.worker, payload)
                .await,
        )
    }

    /// Instance-wide broadcast: delivers to the local shard (sender
    /// excluded only here, on the worker hosting the sender) and fans out
    /// to sibling shards over the bus.
    pub async fn route_broadcast(
        &self,
        instance: &InstanceId,
        message: &Value,
        source: &Address,
    ) -> Result<(), RoutingError> {
        self.check_available()?;

        if let Some(shard) = self.local_instance(instance) {
            let exclude = (source.worker == self.worker_id).then(|| source.connection.clone());
            shard.broadcast(exclude.as_ref(), message).await;
        }

        let payload = serde_json::to_value(BroadcastPayload {
            instance: instance.clone(),
            message: message.clone(),
            source: source.to_string(),
        })?;
        self.guard(self.bus.broadcast(EnvelopeKind::RouteBroadcast, payload).await)
    }

    /// Drops a locally-hosted instance. The originator additionally deletes
    /// the directory key and broadcasts the removal so other workers drop
    /// their shards and cached knowledge.
    pub async fn unregister(
        &self,
        instance: InstanceId,
        is_originator: bool,
    ) -> Result<(), RoutingError> {
        if let Some((_, shard)) = self.local_instances.remove(&instance) {
            shard.close(false).await;
        }
        if is_originator {
            self.guard(self.directory.delete_instance(&instance).await)?;
            let payload = serde_json::to_value(InstanceRemovedPayload { instance })?;
            self.guard(
                self.bus
                    .broadcast(EnvelopeKind::InstanceRemoved, payload)
                    .await,
            )?;
        }
        Ok(())
    }

    /// Closes a connection: membership and directory entry are removed, the
    /// address is invalidated, and the transport is closed. Any in-flight
    /// cross-worker message that arrives afterwards fails back to its
    /// sender with `ConnectionNotFound`.
    pub async fn close_connection(
        &self,
        connection: &Arc<Connection>,
        reason: DisconnectReason,
    ) -> Result<(), RoutingError> {
        let current = connection.address().await.instance;
        self.connections.remove(connection.id());
        let detach_result = self.detach(connection, &current).await;
        connection.invalidate().await;
        connection.close_writer().await;
        info!(
            "👋 connection {} closed on {} ({:?})",
            connection.id(),
            self.worker_id,
            reason
        );
        self.observers
            .notify_connection_closed(connection.id(), &reason)
            .await;
        detach_result
    }

    /// Graceful worker shutdown: closes every local connection (scrubbing
    /// their directory entries) and drops every local shard. Only the
    /// worker's own lobby key is deleted from the directory; shared rooms
    /// may still have shards on other workers.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for connection in connections {
            if let Err(err) = self
                .close_connection(&connection, DisconnectReason::ServerClose)
                .await
            {
                warn!("connection {} did not close cleanly: {}", connection.id(), err);
            }
        }

        let shards: Vec<InstanceId> = self
            .local_instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in shards {
            let is_lobby = id == self.lobby_id;
            if let Err(err) = self.unregister(id.clone(), is_lobby).await {
                warn!("shard {} did not unregister cleanly: {}", id, err);
            }
        }
        info!("instance manager on {} shut down", self.worker_id);
    }

    /// Clears degraded mode after the supervisor restored backend
    /// connectivity.
    pub fn restore(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("worker {} restored, accepting routing operations again", self.worker_id);
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Inbound bus dispatch
    // ------------------------------------------------------------------

    async fn dispatch(&self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::Route => self.on_route(envelope).await,
            EnvelopeKind::RouteBroadcast => self.on_route_broadcast(envelope).await,
            EnvelopeKind::InstanceRemoved => self.on_instance_removed(envelope).await,
            EnvelopeKind::RouteFailed => self.on_route_failed(envelope).await,
        }
    }

    async fn on_route(&self, envelope: Envelope) {
        let payload: RoutePayload = match serde_json::from_value(envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                error!("dropping malformed route payload from {}: {}", envelope.src, err);
                return;
            }
        };
        let source = match Address::parse(&payload.source) {
            Ok(addr) => addr,
            Err(err) => {
                error!("route envelope with unusable source address: {}", err);
                return;
            }
        };
        let target = match Address::parse(&payload.address) {
            Ok(addr) => addr,
            Err(err) => {
                self.report_delivery_failure(&source, &payload.message, &err).await;
                return;
            }
        };

        let outcome = match self.local_instance(&target.instance) {
            Some(shard) => shard.send(&target.connection, &payload.message).await,
            None => Err(RoutingError::ConnectionNotFound(target.connection.clone())),
        };
        if let Err(err) = outcome {
            self.report_delivery_failure(&source, &payload.message, &err).await;
        }
    }

    async fn on_route_broadcast(&self, envelope: Envelope) {
        if envelope.src == self.worker_id {
            // Local members were already served inline by route_broadcast.
            return;
        }
        let payload: BroadcastPayload = match serde_json::from_value(envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                error!("dropping malformed broadcast payload from {}: {}", envelope.src, err);
                return;
            }
        };
        if let Some(shard) = self.local_instance(&payload.instance) {
            shard.broadcast(None, &payload.message).await;
        }
    }

    async fn on_instance_removed(&self, envelope: Envelope) {
        if envelope.src == self.worker_id {
            return;
        }
        let payload: InstanceRemovedPayload = match serde_json::from_value(envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                error!("dropping malformed instance-removed payload: {}", err);
                return;
            }
        };
        if let Some((_, shard)) = self.local_instances.remove(&payload.instance) {
            debug!("instance {} removed by {}", shard.id(), envelope.src);
            shard.close(false).await;
        }
    }

    async fn on_route_failed(&self, envelope: Envelope) {
        let payload: DeliveryFailurePayload = match serde_json::from_value(envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                error!("dropping malformed route-failed payload: {}", err);
                return;
            }
        };
        match Address::parse(&payload.address) {
            Ok(addr) => {
                self.notify_failure_local(&addr, &payload.message, &payload.error)
                    .await
            }
            Err(err) => error!("route-failed envelope with unusable address: {}", err),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Local shard of `name`, created on demand. Creation also ensures the
    /// directory key exists; whether this worker created the key or not,
    /// it hosts a shard for its own members.
    async fn shard(&self, name: &InstanceId) -> Result<Arc<Instance>, RoutingError> {
        if let Some(existing) = self.local_instance(name) {
            return Ok(existing);
        }
        let _created = self.guard(self.directory.register_instance(name).await)?;
        let instance = Instance::new(name.clone(), self.directory.clone(), self.observers.clone());
        Ok(self
            .local_instances
            .entry(name.clone())
            .or_insert(instance)
            .clone())
    }

    /// Removes a connection from its current instance, locally and in the
    /// directory, applying the empty-instance retention policy.
    async fn detach(
        &self,
        connection: &Arc<Connection>,
        instance: &InstanceId,
    ) -> Result<(), RoutingError> {
        if instance.is_unjoined() {
            return Ok(());
        }
        match self.local_instance(instance) {
            Some(shard) => {
                self.guard(shard.drop_connection(connection, true).await)?;
                if shard.is_empty()
                    && !self.policy.retain_empty_instances
                    && *instance != self.lobby_id
                {
                    // The local shard emptied, but sibling shards on other
                    // workers may still hold members. Only the globally
                    // last leaver removes the shared key and announces the
                    // removal; otherwise just drop the local shard.
                    let remaining =
                        self.guard(self.directory.get_all_connections(instance).await)?;
                    self.unregister(instance.clone(), remaining.is_empty())
                        .await?;
                }
            }
            None => {
                // No local shard (already unregistered): still scrub the
                // directory entry.
                self.guard(
                    self.directory
                        .delete_connection(instance, connection.id())
                        .await,
                )?;
            }
        }
        Ok(())
    }

    /// Reports a failed delivery back to the connection that originated the
    /// request: locally if we host it, otherwise via the bus.
    async fn report_delivery_failure(
        &self,
        source: &Address,
        message: &Value,
        err: &RoutingError,
    ) {
        warn!("delivery failure, notifying {}: {}", source, err);
        if source.worker == self.worker_id {
            self.notify_failure_local(source, message, &err.to_string()).await;
            return;
        }
        let payload = DeliveryFailurePayload {
            address: source.to_string(),
            message: message.clone(),
            error: err.to_string(),
        };
        match serde_json::to_value(&payload) {
            Ok(payload) => {
                if let Err(bus_err) = self
                    .bus
                    .send(EnvelopeKind::RouteFailed, &source.worker, payload)
                    .await
                {
                    self.note_backend_loss(&bus_err);
                    error!("unable to report delivery failure to {}: {}", source.worker, bus_err);
                }
            }
            Err(ser_err) => error!("unable to serialize delivery failure: {}", ser_err),
        }
    }

    /// Delivers a structured failure notification to a locally-hosted
    /// connection.
    async fn notify_failure_local(&self, address: &Address, message: &Value, error: &str) {
        let Some(connection) = self.connection(&address.connection) else {
            debug!("source {} gone before failure notification", address);
            return;
        };
        let note = json!({
            "type": "delivery-failure",
            "error": error,
            "original": message,
            "timestamp": crate::types::current_timestamp(),
        });
        if let Err(err) = connection.send(&note).await {
            warn!("failure notification to {} undeliverable: {}", address, err);
        }
    }

    /// Rejects new routing operations while degraded.
    fn check_available(&self) -> Result<(), RoutingError> {
        if self.is_degraded() {
            return Err(RoutingError::BusUnavailable(format!(
                "worker {} is degraded after backend connectivity loss",
                self.worker_id
            )));
        }
        Ok(())
    }

    /// Passes a backend result through, flipping into degraded mode on
    /// connectivity-loss errors.
    fn guard<T>(&self, result: Result<T, RoutingError>) -> Result<T, RoutingError> {
        if let Err(ref err) = result {
            self.note_backend_loss(err);
        }
        result
    }

    fn note_backend_loss(&self, err: &RoutingError) {
        if err.is_backend_loss() && !self.degraded.swap(true, Ordering::SeqCst) {
            error!(
                "worker {} entering degraded mode, rejecting new routing operations: {}",
                self.worker_id, err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusHub;
    use crate::directory::InMemoryDirectory;
    use crate::test_support::RecordingWriter;

    async fn worker(
        hub: &Arc<BusHub>,
        directory: &Arc<InMemoryDirectory>,
        id: &str,
    ) -> Arc<InstanceManager> {
        let (bus, inbox) = hub.attach(WorkerId::new(id));
        let manager = InstanceManager::new(bus, directory.clone(), RouterPolicy::default())
            .await
            .unwrap();
        manager.start(inbox);
        manager
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_is_idempotent_per_worker() {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let manager = worker(&hub, &directory, "w1").await;

        let first = manager.register(InstanceId::new("arena")).await.unwrap();
        let second = manager.register(InstanceId::new("arena")).await.unwrap();
        let first = first.local().expect("creator hosts the room");
        let second = second.local().expect("idempotent re-register");
        assert!(Arc::ptr_eq(first, second));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_places_connection_in_lobby() {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let manager = worker(&hub, &directory, "w1").await;

        let (writer, _rx) = RecordingWriter::channel();
        let conn = manager.accept(writer).await.unwrap();

        let addr = conn.address().await;
        assert_eq!(&addr.instance, manager.lobby_id());
        assert!(manager
            .local_instance(manager.lobby_id())
            .unwrap()
            .contains(conn.id()));
        assert!(directory
            .get_connection(manager.lobby_id(), conn.id())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn join_same_instance_is_a_noop() {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let manager = worker(&hub, &directory, "w1").await;

        let (writer, _rx) = RecordingWriter::channel();
        let conn = manager.accept(writer).await.unwrap();
        manager.join(&conn, InstanceId::new("arena")).await.unwrap();
        let before = conn.address().await;
        manager.join(&conn, InstanceId::new("arena")).await.unwrap();
        assert_eq!(conn.address().await, before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn degraded_worker_rejects_new_operations() {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let manager = worker(&hub, &directory, "w1").await;
        let (writer, _rx) = RecordingWriter::channel();
        let conn = manager.accept(writer).await.unwrap();

        directory.set_online(false);
        let err = manager.join(&conn, InstanceId::new("arena")).await.unwrap_err();
        assert!(err.is_backend_loss());
        assert!(manager.is_degraded());

        // Still degraded even though the backend is back, until restored.
        directory.set_online(true);
        assert!(manager.join(&conn, InstanceId::new("arena")).await.is_err());

        manager.restore();
        manager.join(&conn, InstanceId::new("arena")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn allow_rejoin_keeps_the_previous_room_on_leave() {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let (bus, inbox) = hub.attach(WorkerId::new("w1"));
        let policy = RouterPolicy {
            fallback_to_lobby: false,
            allow_rejoin: true,
            ..RouterPolicy::default()
        };
        let manager = InstanceManager::new(bus, directory.clone(), policy)
            .await
            .unwrap();
        manager.start(inbox);

        let (writer, _rx) = RecordingWriter::channel();
        let conn = manager.accept(writer).await.unwrap();
        let arena = InstanceId::new("arena");
        manager.join(&conn, arena.clone()).await.unwrap();
        manager.leave(&conn).await.unwrap();

        // No longer a member, but the address remembers the room.
        assert!(!manager.local_instance(&arena).unwrap().contains(conn.id()));
        assert_eq!(conn.address().await.instance, arena);

        // Joining the remembered room restores membership.
        manager.join(&conn, arena.clone()).await.unwrap();
        assert!(manager.local_instance(&arena).unwrap().contains(conn.id()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_reports_its_reason_to_observers() {
        struct ReasonRecorder {
            seen: tokio::sync::Mutex<Vec<(ConnectionId, DisconnectReason)>>,
        }

        #[async_trait::async_trait]
        impl RoomObserver for ReasonRecorder {
            async fn connection_closed(&self, connection: &ConnectionId, reason: &DisconnectReason) {
                self.seen
                    .lock()
                    .await
                    .push((connection.clone(), reason.clone()));
            }
        }

        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let manager = worker(&hub, &directory, "w1").await;
        let recorder = Arc::new(ReasonRecorder {
            seen: tokio::sync::Mutex::new(Vec::new()),
        });
        manager.add_observer(recorder.clone()).await;

        let (writer, _rx) = RecordingWriter::channel();
        let conn = manager.accept(writer).await.unwrap();
        manager
            .close_connection(&conn, DisconnectReason::ClientDisconnect)
            .await
            .unwrap();

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0].0, conn.id());
        assert!(matches!(seen[0].1, DisconnectReason::ClientDisconnect));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn leave_falls_back_to_lobby_by_policy() {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        let manager = worker(&hub, &directory, "w1").await;
        let (writer, _rx) = RecordingWriter::channel();
        let conn = manager.accept(writer).await.unwrap();

        manager.join(&conn, InstanceId::new("arena")).await.unwrap();
        manager.leave(&conn).await.unwrap();
        assert_eq!(&conn.address().await.instance, manager.lobby_id());
    }
}
