//! Lifecycle observation.
//!
//! Components interested in room lifecycle register a [`RoomObserver`] with
//! the instance manager. The observer interface is a fixed set of typed
//! methods rather than string-keyed event names, so a typo cannot silently
//! subscribe to nothing.

use crate::types::{ConnectionId, DisconnectReason, InstanceId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fixed-method observer for room lifecycle events.
///
/// All methods default to no-ops; implement only what you care about.
/// Observers run inline on the worker's routing path and should stay
/// cheap; hand anything heavy to a task.
#[async_trait]
pub trait RoomObserver: Send + Sync {
    /// A connection became a member of a local instance shard.
    async fn connection_added(&self, _instance: &InstanceId, _connection: &ConnectionId) {}

    /// A connection left a local instance shard (explicit leave, room
    /// switch, or close).
    async fn connection_dropped(&self, _instance: &InstanceId, _connection: &ConnectionId) {}

    /// A connection was closed on this worker, with the reason the close
    /// was initiated. Fires once per connection lifetime, after the final
    /// `connection_dropped`.
    async fn connection_closed(&self, _connection: &ConnectionId, _reason: &DisconnectReason) {}

    /// A local instance shard closed and released all of its members.
    async fn instance_closed(&self, _instance: &InstanceId) {}
}

/// The set of observers registered on one instance manager.
///
/// Shared between the manager and its instances so that instance-level
/// operations can notify without going back through the manager.
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn RoomObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, observer: Arc<dyn RoomObserver>) {
        self.observers.write().await.push(observer);
    }

    pub(crate) async fn notify_connection_added(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
    ) {
        for observer in self.observers.read().await.iter() {
            observer.connection_added(instance, connection).await;
        }
    }

    pub(crate) async fn notify_connection_dropped(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
    ) {
        for observer in self.observers.read().await.iter() {
            observer.connection_dropped(instance, connection).await;
        }
    }

    pub(crate) async fn notify_connection_closed(
        &self,
        connection: &ConnectionId,
        reason: &DisconnectReason,
    ) {
        for observer in self.observers.read().await.iter() {
            observer.connection_closed(connection, reason).await;
        }
    }

    pub(crate) async fn notify_instance_closed(&self, instance: &InstanceId) {
        for observer in self.observers.read().await.iter() {
            observer.instance_closed(instance).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        added: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl RoomObserver for Counter {
        async fn connection_added(&self, _instance: &InstanceId, _connection: &ConnectionId) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        async fn instance_closed(&self, _instance: &InstanceId) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn observers_receive_only_implemented_events() {
        let set = ObserverSet::new();
        let counter = Arc::new(Counter {
            added: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        set.register(counter.clone()).await;

        let arena = InstanceId::new("arena");
        let conn = ConnectionId::new("c1");
        set.notify_connection_added(&arena, &conn).await;
        set.notify_connection_dropped(&arena, &conn).await; // default no-op
        set.notify_instance_closed(&arena).await;

        assert_eq!(counter.added.load(Ordering::SeqCst), 1);
        assert_eq!(counter.closed.load(Ordering::SeqCst), 1);
    }
}
