//! HTTP(S) client tunnelled through the SOCKS5 dialer.
//!
//! # Responsibilities
//! - Build the pooled hyper client over `ProxyDialer` (+ rustls for https)
//! - Run requests under a deadline and a cancellation token
//! - Read bounded reply bodies (`http_body_util::Limited`)
//!
//! # Design Decisions
//! - One client per process; transports clone it cheaply
//! - Native trust roots first, bundled webpki roots if none are installed
//! - Streaming responses only bound the response head; the body belongs to
//!   the caller for as long as it wants to read it

use std::sync::Once;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::net::ProxyDialer;
use crate::transport::error::TransportError;

type HttpsClient = Client<HttpsConnector<ProxyDialer>, Full<Bytes>>;

/// Default cap for a buffered reply body.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// A response whose body has been read in full.
#[derive(Debug)]
pub struct BufferedResponse {
    pub parts: hyper::http::response::Parts,
    pub body: Bytes,
}

/// Shared HTTP client for every request to the remote peer.
#[derive(Clone)]
pub struct RemoteClient {
    inner: HttpsClient,
    body_limit: usize,
}

static CRYPTO_PROVIDER: Once = Once::new();

fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

impl RemoteClient {
    pub fn new(dialer: ProxyDialer) -> Self {
        install_crypto_provider();

        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "No native TLS roots available, using bundled roots");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let connector = builder.https_or_http().enable_http1().wrap_connector(dialer);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self {
            inner,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Cap the size of bodies read by `execute_buffered`.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Send `req` and wait for the response head.
    pub async fn execute(
        &self,
        req: Request<Full<Bytes>>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Response<Incoming>, TransportError> {
        let url = req.uri().to_string();
        let pending = self.inner.request(req);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, pending) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(source)) => Err(TransportError::Http { url, source }),
                Err(_) => Err(TransportError::Timeout(timeout)),
            },
        }
    }

    /// Send `req` and read the whole body, all within `timeout`.
    pub async fn execute_buffered(
        &self,
        req: Request<Full<Bytes>>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BufferedResponse, TransportError> {
        let started = tokio::time::Instant::now();
        let response = self.execute(req, timeout, cancel).await?;
        let remaining = timeout.saturating_sub(started.elapsed());

        let (parts, body) = response.into_parts();
        let body = read_body(body, self.body_limit, remaining, timeout, cancel).await?;
        Ok(BufferedResponse { parts, body })
    }
}

async fn read_body(
    body: Incoming,
    limit: usize,
    remaining: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes, TransportError> {
    let collect = Limited::new(body, limit).collect();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = tokio::time::timeout(remaining, collect) => match result {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(e)) if e.is::<LengthLimitError>() => {
                Err(TransportError::ReplyTooLarge { limit })
            }
            Ok(Err(e)) => Err(TransportError::Body(e)),
            Err(_) => Err(TransportError::Timeout(timeout)),
        },
    }
}

/// Builds an empty-bodied request, used for probes and the stream GET.
pub fn empty_request(
    method: hyper::Method,
    url: &url::Url,
    headers: &[(&str, &str)],
) -> Result<Request<Full<Bytes>>, TransportError> {
    let mut builder = Request::builder().method(method).uri(url.as_str());
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    Ok(builder.body(Full::new(Bytes::new()))?)
}
