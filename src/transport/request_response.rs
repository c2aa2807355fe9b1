//! Request/response ("streamable HTTP") transport.
//!
//! Every message is its own POST and the reply comes back in the response
//! body. There is no background task; replies are queued by `send` and the
//! relay drains them right after each call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use serde::de::IgnoredAny;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Span};
use url::Url;

use super::queue::{self, QueueReceiver, QueueSender};
use super::{Delivery, Transport, TransportError, TransportKind, TransportSettings};
use crate::http::{RemoteClient, SESSION_HEADER};

const APPLICATION_JSON: &str = "application/json";

pub struct RequestResponseTransport {
    client: RemoteClient,
    url: Url,
    request_timeout: Duration,
    session: RwLock<Option<HeaderValue>>,
    queue_tx: Mutex<Option<QueueSender>>,
    queue_rx: QueueReceiver,
    closed: AtomicBool,
    span: Span,
}

impl RequestResponseTransport {
    pub fn new(client: RemoteClient, url: Url, settings: &TransportSettings, span: Span) -> Self {
        let (tx, rx) = queue::channel(settings.queue_capacity);
        Self {
            client,
            url,
            request_timeout: settings.request_timeout,
            session: RwLock::new(None),
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: rx,
            closed: AtomicBool::new(false),
            span,
        }
    }

    /// Session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    async fn request(&self, method: Method) -> hyper::http::request::Builder {
        let builder = Request::builder().method(method).uri(self.url.as_str());
        match self.session.read().await.as_ref() {
            Some(session) => builder.header(SESSION_HEADER, session.clone()),
            None => builder,
        }
    }

    async fn remember_session(&self, headers: &hyper::HeaderMap) {
        let Some(value) = headers.get(SESSION_HEADER) else {
            return;
        };
        let mut session = self.session.write().await;
        if session.as_ref() != Some(value) {
            debug!(parent: &self.span, session = ?value, "Server assigned session");
            *session = Some(value.clone());
        }
    }
}

/// Probe statuses that still prove the server is there.
fn probe_accepted(status: StatusCode) -> bool {
    !(status.is_client_error() || status.is_server_error())
        || status == StatusCode::METHOD_NOT_ALLOWED
        || status == StatusCode::NOT_IMPLEMENTED
}

/// An accepted notification: no reply expected.
fn is_empty_ack(status: StatusCode, body: &[u8]) -> bool {
    matches!(status, StatusCode::ACCEPTED | StatusCode::NO_CONTENT)
        && body.iter().all(u8::is_ascii_whitespace)
}

#[async_trait]
impl Transport for RequestResponseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::RequestResponse
    }

    fn delivery(&self) -> Delivery {
        Delivery::Inline
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let req = self
            .request(Method::OPTIONS)
            .await
            .body(Full::new(Bytes::new()))?;
        let response = self
            .client
            .execute_buffered(req, self.request_timeout, cancel)
            .await?;

        let status = response.parts.status;
        if !probe_accepted(status) {
            return Err(TransportError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        self.remember_session(&response.parts.headers).await;

        info!(parent: &self.span, url = %self.url, %status, "Server reachable");
        Ok(())
    }

    async fn send(&self, message: Bytes, cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let Some(tx) = self.queue_tx.lock().await.clone() else {
            return Err(TransportError::Closed);
        };

        let req = self
            .request(Method::POST)
            .await
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .header(ACCEPT, APPLICATION_JSON)
            .body(Full::new(message))?;
        let response = self
            .client
            .execute_buffered(req, self.request_timeout, cancel)
            .await?;

        let status = response.parts.status;
        self.remember_session(&response.parts.headers).await;
        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        if is_empty_ack(status, &response.body) {
            debug!(parent: &self.span, %status, "Message accepted without reply");
            return Ok(());
        }

        serde_json::from_slice::<IgnoredAny>(&response.body)
            .map_err(TransportError::InvalidReply)?;

        if tx.push(Ok(response.body), cancel).await {
            Ok(())
        } else {
            Err(TransportError::Cancelled)
        }
    }

    async fn receive(&self) -> Option<Result<Bytes, TransportError>> {
        self.queue_rx.recv().await
    }

    fn try_receive(&self) -> Option<Result<Bytes, TransportError>> {
        self.queue_rx.try_recv()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue_tx.lock().await.take();
        debug!(parent: &self.span, "Request/response transport closed");
    }
}
