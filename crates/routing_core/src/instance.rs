//! An in-process room shard.
//!
//! An [`Instance`] holds the connections of one room that are attached to
//! *this* worker. A logical room may have one such shard on every worker
//! with members, but the room identity itself (the directory hash key) is
//! created exactly once cluster-wide; see
//! [`InstanceManager::register`](crate::InstanceManager::register).
//!
//! Everything an instance does is local-shard-only. Cross-shard broadcast
//! is composed one level up by the instance manager, which pairs the local
//! fan-out here with a bus broadcast to sibling shards.

use crate::connection::Connection;
use crate::directory::SharedDirectory;
use crate::error::RoutingError;
use crate::events::ObserverSet;
use crate::types::{ConnectionId, InstanceId};
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// The local shard of a logical room.
pub struct Instance {
    id: InstanceId,
    members: DashMap<ConnectionId, Arc<Connection>>,
    directory: Arc<dyn SharedDirectory>,
    observers: Arc<ObserverSet>,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        directory: Arc<dyn SharedDirectory>,
        observers: Arc<ObserverSet>,
    ) -> Arc<Self> {
        debug!("creating instance shard: {}", id);
        Arc::new(Self {
            id,
            members: DashMap::new(),
            directory,
            observers,
        })
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Number of locally-attached members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// The empty state is observable so callers can apply their retention
    /// policy; the core never deletes an empty instance on its own.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.members.contains_key(connection)
    }

    pub fn member(&self, connection: &ConnectionId) -> Option<Arc<Connection>> {
        self.members.get(connection).map(|entry| entry.clone())
    }

    /// Inserts a connection into the local member set, updates its address,
    /// and publishes the directory entry.
    ///
    /// Local membership is authoritative for local delivery: if the
    /// directory write fails, the local add stands and the error is
    /// returned for the caller to report.
    pub async fn add_connection(&self, connection: Arc<Connection>) -> Result<(), RoutingError> {
        connection.set_instance(self.id.clone()).await;
        self.members
            .insert(connection.id().clone(), connection.clone());

        let raw = connection.raw_address().await;
        let directory_result = self
            .directory
            .put_connection(&self.id, connection.id(), &raw)
            .await;
        if let Err(ref err) = directory_result {
            warn!(
                "directory write for {} joining {} failed, keeping local membership: {}",
                connection.id(),
                self.id,
                err
            );
        }

        self.observers
            .notify_connection_added(&self.id, connection.id())
            .await;
        directory_result
    }

    /// Removes a connection from the local member set. When `bubble` is
    /// true the directory entry is deleted too, so the rest of the cluster
    /// stops routing here.
    pub async fn drop_connection(
        &self,
        connection: &Arc<Connection>,
        bubble: bool,
    ) -> Result<(), RoutingError> {
        self.members.remove(connection.id());

        let directory_result = if bubble {
            self.directory
                .delete_connection(&self.id, connection.id())
                .await
        } else {
            Ok(())
        };

        self.observers
            .notify_connection_dropped(&self.id, connection.id())
            .await;
        directory_result
    }

    /// Local unicast to one member.
    pub async fn send(&self, target: &ConnectionId, message: &Value) -> Result<(), RoutingError> {
        match self.member(target) {
            Some(connection) => connection.send(message).await,
            None => Err(RoutingError::ConnectionNotFound(target.clone())),
        }
    }

    /// Local-shard-only broadcast: delivers to every local member except
    /// `exclude` (pass `None` to include all).
    ///
    /// Per-member delivery failures are logged and skipped; one dead
    /// member must not stop the fan-out.
    pub async fn broadcast(&self, exclude: Option<&ConnectionId>, message: &Value) {
        // Snapshot the members so no map lock is held across awaits.
        let targets: Vec<Arc<Connection>> = self
            .members
            .iter()
            .filter(|entry| Some(entry.key()) != exclude)
            .map(|entry| entry.value().clone())
            .collect();

        let deliveries = targets.iter().map(|connection| connection.send(message));
        for (connection, outcome) in targets.iter().zip(join_all(deliveries).await) {
            if let Err(err) = outcome {
                warn!(
                    "broadcast delivery to {} on {} failed: {}",
                    connection.id(),
                    self.id,
                    err
                );
            }
        }
    }

    /// Removes every member, optionally closing each connection's
    /// transport, and notifies observers. Returns the released connections
    /// so the caller (the manager) can clean up its own bookkeeping and the
    /// directory entry.
    pub async fn close(&self, disconnect: bool) -> Vec<Arc<Connection>> {
        let released: Vec<Arc<Connection>> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.members.clear();

        for connection in &released {
            if disconnect {
                connection.invalidate().await;
                connection.close_writer().await;
            } else {
                connection.set_instance(InstanceId::unjoined()).await;
            }
        }

        self.observers.notify_instance_closed(&self.id).await;
        released
    }
}
