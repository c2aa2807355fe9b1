//! Bounded, ordered delivery queue between a transport and the relay.
//!
//! Producers block when the queue is full; nothing is ever dropped. Every
//! blocking operation races a cancellation token.

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::error::TransportError;

/// One delivery: a message, or the error that ended the stream.
pub type Queued = Result<Bytes, TransportError>;

/// Create a queue holding at most `capacity` undelivered messages.
pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx: Mutex::new(rx) })
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Queued>,
}

impl QueueSender {
    /// Enqueue, waiting for room. Returns false if cancelled or the
    /// receiving side is gone.
    pub async fn push(&self, item: Queued, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: Mutex<mpsc::Receiver<Queued>>,
}

impl QueueReceiver {
    /// Wait for the next delivery. `None` once every sender is dropped and
    /// the queue is drained.
    pub async fn recv(&self) -> Option<Queued> {
        self.rx.lock().await.recv().await
    }

    /// Take a delivery if one is ready.
    pub fn try_recv(&self) -> Option<Queued> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}
