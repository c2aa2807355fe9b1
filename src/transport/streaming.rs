//! Server-sent event stream transport.
//!
//! # Responsibilities
//! - Open the event stream and validate status and content type
//! - Run the background reader that parses events into the delivery queue
//! - POST outgoing messages to the companion endpoint
//!
//! # Design Decisions
//! - The reader owns the only queue sender; when it exits the queue drains
//!   and `receive` reports closed
//! - The reader runs under a child token of its own so `close` can stop it
//!   without touching the caller's cancellation tree
//! - An `endpoint` event moves the POST target and is never relayed
//! - Until the stream has produced its first event, a send waits briefly so
//!   that an announced endpoint is in place before the first POST

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use hyper::{Method, Request};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};
use url::Url;

use super::event::EventParser;
use super::queue::{self, QueueReceiver, QueueSender};
use super::{Delivery, Transport, TransportError, TransportKind, TransportSettings};
use crate::http::{empty_request, RemoteClient};

const EVENT_STREAM: &str = "text/event-stream";
const ENDPOINT_EVENT: &str = "endpoint";

/// How long `close` waits for the reader task to finish.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the first send waits for the stream's first event.
const FIRST_EVENT_WAIT: Duration = Duration::from_secs(1);

pub struct StreamingTransport {
    client: RemoteClient,
    stream_url: Url,
    post_url: Arc<RwLock<Url>>,
    request_timeout: Duration,
    max_event_bytes: usize,
    queue_tx: Mutex<Option<QueueSender>>,
    queue_rx: QueueReceiver,
    reader_cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// True once the stream has produced an event or ended.
    settled: Arc<watch::Sender<bool>>,
    connected: AtomicBool,
    closed: AtomicBool,
    span: Span,
}

impl StreamingTransport {
    pub fn new(client: RemoteClient, url: Url, settings: &TransportSettings, span: Span) -> Self {
        let (tx, rx) = queue::channel(settings.queue_capacity);
        let post_url = companion_post_url(&url);
        Self {
            client,
            stream_url: url,
            post_url: Arc::new(RwLock::new(post_url)),
            request_timeout: settings.request_timeout,
            max_event_bytes: settings.max_event_bytes,
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: rx,
            reader_cancel: CancellationToken::new(),
            reader: Mutex::new(None),
            settled: Arc::new(watch::channel(false).0),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            span,
        }
    }

    /// Current POST target.
    pub async fn post_url(&self) -> Url {
        self.post_url.read().await.clone()
    }

    async fn await_first_event(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let mut settled = self.settled.subscribe();
        if *settled.borrow_and_update() {
            return Ok(());
        }

        let timed_out = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            waited = tokio::time::timeout(FIRST_EVENT_WAIT, settled.wait_for(|ready| *ready)) => {
                waited.is_err()
            }
        };
        if timed_out {
            debug!(parent: &self.span, "No event yet, posting to the default endpoint");
            self.settled.send_replace(true);
        }
        Ok(())
    }
}

/// POST endpoint paired with a stream URL: a trailing `/sse` segment is
/// removed, anything else is used as-is.
pub fn companion_post_url(stream_url: &Url) -> Url {
    let mut url = stream_url.clone();
    if let Some(stripped) = stream_url.path().strip_suffix("/sse") {
        let path = if stripped.is_empty() { "/" } else { stripped };
        url.set_path(path);
    }
    url
}

#[async_trait]
impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn delivery(&self) -> Delivery {
        Delivery::Background
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let req = empty_request(
            Method::GET,
            &self.stream_url,
            &[
                (ACCEPT.as_str(), EVENT_STREAM),
                (CACHE_CONTROL.as_str(), "no-cache"),
                (CONNECTION.as_str(), "keep-alive"),
            ],
        )?;
        let response = self
            .client
            .execute(req, self.request_timeout, cancel)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response.into_body()).await;
            return Err(TransportError::UnexpectedStatus { status, body });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM) {
            return Err(TransportError::UnexpectedContentType { content_type });
        }

        let Some(tx) = self.queue_tx.lock().await.take() else {
            return Err(TransportError::Closed);
        };

        let reader = EventReader {
            tx,
            post_url: Arc::clone(&self.post_url),
            stream_url: self.stream_url.clone(),
            max_event_bytes: self.max_event_bytes,
            settled: Arc::clone(&self.settled),
            cancel: self.reader_cancel.clone(),
        };
        let handle = tokio::spawn(
            reader
                .run(response.into_body())
                .instrument(self.span.clone()),
        );
        *self.reader.lock().await = Some(handle);
        self.connected.store(true, Ordering::SeqCst);

        info!(parent: &self.span, url = %self.stream_url, "Event stream connected");
        Ok(())
    }

    async fn send(&self, message: Bytes, cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        self.await_first_event(cancel).await?;
        let url = self.post_url().await;
        let req = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(message))?;

        let response = self
            .client
            .execute_buffered(req, self.request_timeout, cancel)
            .await?;

        let status = response.parts.status;
        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        debug!(parent: &self.span, %status, "Message posted");
        Ok(())
    }

    async fn receive(&self) -> Option<Result<Bytes, TransportError>> {
        if !self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst) {
            return Some(Err(TransportError::NotConnected));
        }
        self.queue_rx.recv().await
    }

    fn try_receive(&self) -> Option<Result<Bytes, TransportError>> {
        self.queue_rx.try_recv()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader_cancel.cancel();
        // Never connected: drop the unused sender so receivers see the end.
        self.queue_tx.lock().await.take();

        if let Some(handle) = self.reader.lock().await.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(READER_JOIN_TIMEOUT, handle).await.is_err() {
                abort.abort();
            }
        }
        debug!(parent: &self.span, "Event stream closed");
    }
}

/// Background half of the transport: body bytes in, events out.
struct EventReader {
    tx: QueueSender,
    post_url: Arc<RwLock<Url>>,
    stream_url: Url,
    max_event_bytes: usize,
    settled: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
}

impl EventReader {
    async fn run(self, body: Incoming) {
        self.read_events(body).await;
        self.settled.send_replace(true);
    }

    async fn read_events(&self, mut body: Incoming) {
        let mut parser = EventParser::new();

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                frame = body.frame() => frame,
            };

            let chunk = match frame {
                None => {
                    info!("Event stream ended by server");
                    return;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Event stream read failed");
                    self.tx.push(Err(TransportError::Body(e.into())), &self.cancel).await;
                    return;
                }
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => data,
                    Err(_) => continue,
                },
            };

            let events = parser.push(&chunk);
            let any = !events.is_empty();
            for event in events {
                if event.name() == ENDPOINT_EVENT {
                    self.adopt_endpoint(event.data.trim()).await;
                    continue;
                }
                if !self.tx.push(Ok(Bytes::from(event.data)), &self.cancel).await {
                    return;
                }
            }
            if any {
                self.settled.send_replace(true);
            }

            if parser.buffered_len() > self.max_event_bytes {
                let limit = self.max_event_bytes;
                warn!(limit, "Event stream event too large");
                self.tx
                    .push(Err(TransportError::EventTooLarge { limit }), &self.cancel)
                    .await;
                return;
            }
        }
    }

    async fn adopt_endpoint(&self, target: &str) {
        match self.stream_url.join(target) {
            Ok(url) => {
                info!(endpoint = %url, "Server announced message endpoint");
                *self.post_url.write().await = url;
            }
            Err(e) => warn!(endpoint = target, error = %e, "Ignoring unusable endpoint event"),
        }
    }
}

async fn read_error_body(body: Incoming) -> String {
    // Best effort: the status alone is the error.
    match tokio::time::timeout(Duration::from_secs(2), body.collect()).await {
        Ok(Ok(collected)) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        _ => String::new(),
    }
}
