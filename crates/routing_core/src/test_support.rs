//! Shared test doubles for the unit tests in this crate.

use crate::connection::ConnectionWriter;
use crate::error::RoutingError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Writer double that records every delivered payload as parsed JSON.
pub(crate) struct RecordingWriter {
    tx: mpsc::UnboundedSender<Value>,
    closed: AtomicBool,
}

impl RecordingWriter {
    pub(crate) fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionWriter for RecordingWriter {
    async fn deliver(&self, payload: &[u8]) -> Result<(), RoutingError> {
        let value = serde_json::from_slice(payload)?;
        let _ = self.tx.send(value);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
