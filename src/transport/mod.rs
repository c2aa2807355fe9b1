//! Wire transports to the remote JSON-RPC peer.
//!
//! # Data Flow
//! ```text
//! Streaming (streaming.rs):
//!     connect: GET text/event-stream ──▶ background reader
//!     reader:  body chunks → event.rs parser → queue.rs ──▶ receive()
//!     send:    POST companion endpoint (reply arrives on the stream)
//!
//! Request/Response (request_response.rs):
//!     connect: OPTIONS probe
//!     send:    POST → JSON reply → queue.rs ──▶ try_receive()
//!
//! detector.rs picks one of the two when the mode is `auto`.
//! ```
//!
//! # Design Decisions
//! - Both transports sit behind one object-safe trait; the relay branches
//!   once on [`Delivery`] to choose its outbound strategy
//! - The queue is bounded and blocks producers instead of dropping messages
//! - `close` is idempotent and safe to call from any task

pub mod detector;
pub mod error;
pub mod event;
pub mod queue;
pub mod request_response;
pub mod streaming;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use url::Url;

use crate::http::RemoteClient;

pub use error::TransportError;
pub use request_response::RequestResponseTransport;
pub use streaming::StreamingTransport;

/// Which wire protocol a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent server-sent event stream plus POSTs.
    Streaming,
    /// One POST per message, reply in the response body.
    RequestResponse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Streaming => f.write_str("sse"),
            TransportKind::RequestResponse => f.write_str("streamable"),
        }
    }
}

/// How replies reach the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Replies arrive asynchronously; someone must keep calling `receive`.
    Background,
    /// Replies are queued by `send` itself and can be drained right after.
    Inline,
}

/// A connection to the remote peer.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn delivery(&self) -> Delivery;

    /// Establish the connection. Fails fast; never retried.
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Deliver one message to the peer.
    async fn send(&self, message: Bytes, cancel: &CancellationToken)
        -> Result<(), TransportError>;

    /// Next message from the peer. `None` means the transport is closed.
    async fn receive(&self) -> Option<Result<Bytes, TransportError>>;

    /// A message from the peer if one is already queued.
    fn try_receive(&self) -> Option<Result<Bytes, TransportError>>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&self);
}

/// Knobs shared by both transports.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Deadline for each POST / probe / stream handshake.
    pub request_timeout: Duration,
    /// Capacity of the delivery queue.
    pub queue_capacity: usize,
    /// Largest event the stream reader will buffer.
    pub max_event_bytes: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            queue_capacity: 100,
            max_event_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Build the transport for `kind`.
pub fn build(
    kind: TransportKind,
    client: RemoteClient,
    url: Url,
    settings: &TransportSettings,
    span: Span,
) -> Arc<dyn Transport> {
    match kind {
        TransportKind::Streaming => Arc::new(StreamingTransport::new(client, url, settings, span)),
        TransportKind::RequestResponse => {
            Arc::new(RequestResponseTransport::new(client, url, settings, span))
        }
    }
}
