//! The relay server: one worker process wrapped around an
//! [`InstanceManager`].
//!
//! The server owns the worker's backends, the manager, and its dispatch
//! task, and enforces process-level concerns (connection limits, lifecycle
//! logging) that do not belong in the routing core.

use crate::config::Config;
use async_trait::async_trait;
use routing_core::{
    BusHub, Connection, ConnectionId, ConnectionWriter, DisconnectReason, InMemoryDirectory,
    InstanceId, InstanceManager, RoomObserver, RouterPolicy, RoutingError, WorkerId,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Resolved server configuration, ready to build a worker from.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub worker_id: WorkerId,
    pub listen_addr: String,
    pub max_connections: usize,
    pub policy: RouterPolicy,
}

impl ServerConfig {
    /// Resolves the TOML configuration into concrete values, generating a
    /// worker id when none was configured.
    pub fn from_config(config: &Config) -> Self {
        let worker_id = config
            .worker
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4().simple()));
        Self {
            worker_id: WorkerId::new(worker_id),
            listen_addr: config.worker.listen_addr.clone(),
            max_connections: config.worker.max_connections,
            policy: RouterPolicy {
                default_instance: config.policy.default_instance.clone(),
                retain_empty_instances: config.policy.retain_empty_instances,
                fallback_to_lobby: config.policy.fallback_to_lobby,
                allow_rejoin: config.policy.allow_rejoin,
            },
        }
    }
}

/// Errors surfaced by the server shell.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured connection limit is reached; the transport layer
    /// should refuse the handshake.
    #[error("connection limit reached ({0} connections)")]
    ConnectionLimit(usize),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// One worker process: backends, instance manager, and dispatch task.
pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<BusHub>,
    manager: Arc<InstanceManager>,
    dispatch: JoinHandle<()>,
}

impl RelayServer {
    /// Starts a standalone worker with its own in-process backends.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let hub = BusHub::new();
        let directory = InMemoryDirectory::new();
        Self::start_with_backends(config, hub, directory).await
    }

    /// Starts a worker against shared backends. Several workers sharing one
    /// hub and directory form a cluster; this is also how integration tests
    /// stand up multi-worker topologies in one process.
    pub async fn start_with_backends(
        config: ServerConfig,
        hub: Arc<BusHub>,
        directory: Arc<InMemoryDirectory>,
    ) -> Result<Self, ServerError> {
        let (bus, inbox) = hub.attach(config.worker_id.clone());
        let manager = InstanceManager::new(bus, directory, config.policy.clone()).await?;
        manager.add_observer(Arc::new(LifecycleLogger)).await;
        let dispatch = manager.start(inbox);

        info!(
            "🚀 relay worker {} up, listen addr {}, limit {} connections",
            config.worker_id, config.listen_addr, config.max_connections
        );
        Ok(Self {
            config,
            hub,
            manager,
            dispatch,
        })
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.config.worker_id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The routing facade: register, join, route, broadcast.
    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    /// Admits a freshly accepted transport connection, enforcing the
    /// configured connection limit before it reaches the routing core.
    pub async fn accept(
        &self,
        writer: Arc<dyn ConnectionWriter>,
    ) -> Result<Arc<Connection>, ServerError> {
        if self.manager.connection_count() >= self.config.max_connections {
            return Err(ServerError::ConnectionLimit(self.config.max_connections));
        }
        Ok(self.manager.accept(writer).await?)
    }

    /// Graceful shutdown: drains the routing core, then detaches from the
    /// bus so in-flight envelopes for this worker are dropped rather than
    /// queued forever.
    pub async fn shutdown(self) {
        info!("🛑 relay worker {} shutting down", self.config.worker_id);
        self.manager.shutdown().await;
        self.hub.detach(&self.config.worker_id);
        self.dispatch.abort();
        info!("✅ relay worker {} shutdown complete", self.config.worker_id);
    }
}

/// Logs room lifecycle at info level, the worker's only built-in observer.
struct LifecycleLogger;

#[async_trait]
impl RoomObserver for LifecycleLogger {
    async fn connection_added(&self, instance: &InstanceId, connection: &ConnectionId) {
        info!("➕ {} joined {}", connection, instance);
    }

    async fn connection_dropped(&self, instance: &InstanceId, connection: &ConnectionId) {
        info!("➖ {} left {}", connection, instance);
    }

    async fn connection_closed(&self, connection: &ConnectionId, reason: &DisconnectReason) {
        info!("👋 {} disconnected ({:?})", connection, reason);
    }

    async fn instance_closed(&self, instance: &InstanceId) {
        info!("🚪 instance {} closed", instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config(worker: &str, max_connections: usize) -> ServerConfig {
        let mut config = Config::default();
        config.worker.worker_id = Some(worker.to_string());
        config.worker.max_connections = max_connections;
        ServerConfig::from_config(&config)
    }

    #[test]
    fn generates_worker_id_when_unset() {
        let resolved = ServerConfig::from_config(&Config::default());
        assert!(resolved.worker_id.as_str().starts_with("worker-"));
        assert!(!resolved.worker_id.as_str().contains(':'));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_starts_and_shuts_down() {
        let server = RelayServer::start(test_config("w1", 10)).await.unwrap();
        assert_eq!(server.worker_id(), &WorkerId::new("w1"));
        server.shutdown().await;
    }
}
