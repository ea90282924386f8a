//! The transport bus: pub/sub between worker processes.
//!
//! Each worker owns one bus handle. The handle publishes to a per-worker
//! channel (`send`) or to the shared broadcast channel (`broadcast`), and
//! the worker's instance manager drains a single inbound receiver for both.
//! Delivery is best-effort and unordered across senders, but FIFO per
//! sender→receiver pair. There is no built-in acknowledgement; callers that
//! need confirmation encode a reply envelope.
//!
//! [`BusHub`] is the in-process backend: a subscriber table of per-worker
//! channels. It stands in for an external pub/sub system and doubles as the
//! multi-worker test harness. When the hub is marked offline every call
//! fails fast with [`RoutingError::BusUnavailable`]; the core never
//! reconnects on its own; that is the supervisor's job.

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::RoutingError;
use crate::types::WorkerId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Point-to-point and fan-out envelope publishing.
///
/// One implementation per backing transport; the router only ever talks to
/// this trait.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// The worker this handle publishes as. Stamped into every envelope's
    /// `src` field.
    fn worker_id(&self) -> &WorkerId;

    /// Publishes an envelope to one worker's channel.
    async fn send(
        &self,
        kind: EnvelopeKind,
        target: &WorkerId,
        payload: Value,
    ) -> Result<(), RoutingError>;

    /// Publishes an envelope to every subscribed worker, including the
    /// sender. Receivers filter by `src` where self-delivery is unwanted.
    async fn broadcast(&self, kind: EnvelopeKind, payload: Value) -> Result<(), RoutingError>;
}

/// In-process pub/sub backend shared by every worker in the process.
///
/// Holds one unbounded channel per attached worker. Unbounded mpsc gives
/// the FIFO-per-pair guarantee the bus contract requires.
pub struct BusHub {
    subscribers: DashMap<WorkerId, mpsc::UnboundedSender<Envelope>>,
    online: AtomicBool,
}

impl BusHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            online: AtomicBool::new(true),
        })
    }

    /// Subscribes a worker to its process channel and the broadcast channel,
    /// returning the publish handle and the single inbound receiver. The
    /// handle is live as soon as this returns.
    pub fn attach(
        self: &Arc<Self>,
        worker: WorkerId,
    ) -> (Arc<WorkerBus>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(worker.clone(), tx);
        debug!("worker {} attached to bus hub", worker);
        let bus = Arc::new(WorkerBus {
            hub: self.clone(),
            worker,
        });
        (bus, rx)
    }

    /// Unsubscribes a worker; envelopes addressed to it are dropped from
    /// then on (best-effort delivery).
    pub fn detach(&self, worker: &WorkerId) {
        self.subscribers.remove(worker);
    }

    /// Simulates backend connectivity loss (`false`) or restoration
    /// (`true`). While offline, every send and broadcast fails fast.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), RoutingError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RoutingError::BusUnavailable(
                "bus backend connection lost".to_string(),
            ))
        }
    }

    fn publish(&self, target: &WorkerId, envelope: Envelope) {
        if let Some(tx) = self.subscribers.get(target) {
            // A closed receiver means the worker is gone; best-effort drop.
            let _ = tx.send(envelope);
        }
    }

    fn publish_all(&self, envelope: &Envelope) {
        for entry in self.subscribers.iter() {
            let _ = entry.value().send(envelope.clone());
        }
    }
}

/// One worker's handle onto a [`BusHub`].
pub struct WorkerBus {
    hub: Arc<BusHub>,
    worker: WorkerId,
}

#[async_trait]
impl MessageBus for WorkerBus {
    fn worker_id(&self) -> &WorkerId {
        &self.worker
    }

    async fn send(
        &self,
        kind: EnvelopeKind,
        target: &WorkerId,
        payload: Value,
    ) -> Result<(), RoutingError> {
        self.hub.check_online()?;
        let envelope = Envelope::new(kind, self.worker.clone(), payload);
        self.hub.publish(target, envelope);
        Ok(())
    }

    async fn broadcast(&self, kind: EnvelopeKind, payload: Value) -> Result<(), RoutingError> {
        self.hub.check_online()?;
        let envelope = Envelope::new(kind, self.worker.clone(), payload);
        self.hub.publish_all(&envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_targets_one_worker() {
        let hub = BusHub::new();
        let (bus_a, _rx_a) = hub.attach(WorkerId::new("a"));
        let (_bus_b, mut rx_b) = hub.attach(WorkerId::new("b"));
        let (_bus_c, mut rx_c) = hub.attach(WorkerId::new("c"));

        bus_a
            .send(EnvelopeKind::Route, &WorkerId::new("b"), json!({"n": 1}))
            .await
            .unwrap();

        let env = rx_b.recv().await.unwrap();
        assert_eq!(env.kind, EnvelopeKind::Route);
        assert_eq!(env.src, WorkerId::new("a"));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_is_fifo_per_pair() {
        let hub = BusHub::new();
        let (bus_a, _rx_a) = hub.attach(WorkerId::new("a"));
        let (_bus_b, mut rx_b) = hub.attach(WorkerId::new("b"));

        for n in 0..10 {
            bus_a
                .send(EnvelopeKind::Route, &WorkerId::new("b"), json!({ "n": n }))
                .await
                .unwrap();
        }
        for n in 0..10 {
            let env = rx_b.recv().await.unwrap();
            assert_eq!(env.payload["n"], n);
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_including_sender() {
        let hub = BusHub::new();
        let (bus_a, mut rx_a) = hub.attach(WorkerId::new("a"));
        let (_bus_b, mut rx_b) = hub.attach(WorkerId::new("b"));

        bus_a
            .broadcast(EnvelopeKind::RouteBroadcast, json!({"hello": true}))
            .await
            .unwrap();

        assert_eq!(rx_a.recv().await.unwrap().src, WorkerId::new("a"));
        assert_eq!(rx_b.recv().await.unwrap().src, WorkerId::new("a"));
    }

    #[tokio::test]
    async fn offline_hub_fails_fast() {
        let hub = BusHub::new();
        let (bus_a, _rx_a) = hub.attach(WorkerId::new("a"));
        hub.set_online(false);

        let err = bus_a
            .broadcast(EnvelopeKind::RouteBroadcast, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::BusUnavailable(_)));

        hub.set_online(true);
        bus_a
            .broadcast(EnvelopeKind::RouteBroadcast, json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_to_detached_worker_is_best_effort() {
        let hub = BusHub::new();
        let (bus_a, _rx_a) = hub.attach(WorkerId::new("a"));
        hub.detach(&WorkerId::new("gone"));

        // No subscriber for the target: delivery is silently dropped.
        bus_a
            .send(EnvelopeKind::Route, &WorkerId::new("gone"), json!({}))
            .await
            .unwrap();
    }
}
