//! SOCKS5-aware dialer.
//!
//! # Responsibilities
//! - Open a TCP connection to the SOCKS5 proxy and tunnel to a target
//! - Apply the hostname resolution policy (local or proxy-side)
//! - Abort any in-flight resolution or handshake when cancelled
//! - Act as the connector of the HTTP client (`tower::Service<Uri>`)
//!
//! # Design Decisions
//! - Stateless beyond configuration: every dial is independent, so one
//!   dialer can serve concurrent requests from a pooled client
//! - Resolution and handshake futures race the cancellation token and are
//!   dropped when it fires, which closes any half-open socket
//! - Proxy-side failures and target resolution failures are separate error
//!   variants so callers can tell "fix your proxy" from "fix your URL"
//!
//! # Data Flow
//! ```text
//! Uri (host, port)
//!     → literal IP?          yes → TargetAddr::Ip
//!     → policy Remote?       yes → TargetAddr::Domain (proxy resolves)
//!     → policy Local         → Resolve::resolve → first address → TargetAddr::Ip
//!     → TCP connect to proxy → socks5::connect → tunnelled TcpStream
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::Uri;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, Instrument, Span};

use super::resolver::{Resolve, SystemResolver};
use super::socks5::{self, Credentials, HandshakeError, TargetAddr};

/// Where target hostnames are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// Resolve on this host, send the proxy an IP address (`socks5://`).
    Local,
    /// Send the proxy the hostname (`socks5h://`).
    Remote,
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPolicy::Local => f.write_str("local"),
            ResolutionPolicy::Remote => f.write_str("remote"),
        }
    }
}

/// Errors produced while establishing a tunnelled connection.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial cancelled")]
    Cancelled,

    #[error("failed to resolve host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("host '{host}' resolved to no addresses")]
    NoAddresses { host: String },

    #[error("cannot reach SOCKS5 proxy at {proxy}: {source}")]
    ProxyUnreachable {
        proxy: String,
        #[source]
        source: io::Error,
    },

    #[error("SOCKS5 negotiation with {proxy} failed: {source}")]
    Handshake {
        proxy: String,
        #[source]
        source: HandshakeError,
    },

    #[error("request URI has no host: {0}")]
    MissingHost(String),
}

impl DialError {
    /// True when the failure lies with the proxy (unreachable, auth, CONNECT
    /// refused) rather than with the target hostname.
    pub fn is_proxy_failure(&self) -> bool {
        matches!(
            self,
            DialError::ProxyUnreachable { .. } | DialError::Handshake { .. }
        )
    }

    /// The underlying I/O error kind, if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            DialError::Resolve { source, .. } | DialError::ProxyUnreachable { source, .. } => {
                Some(source.kind())
            }
            DialError::Handshake {
                source: HandshakeError::Io(e),
                ..
            } => Some(e.kind()),
            _ => None,
        }
    }
}

/// Connector that tunnels every connection through a SOCKS5 proxy.
#[derive(Clone)]
pub struct ProxyDialer {
    proxy_addr: String,
    credentials: Option<Credentials>,
    policy: ResolutionPolicy,
    resolver: Arc<dyn Resolve>,
    cancel: CancellationToken,
    span: Span,
}

impl fmt::Debug for ProxyDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDialer")
            .field("proxy_addr", &self.proxy_addr)
            .field("credentials", &self.credentials)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ProxyDialer {
    /// Create a dialer for the proxy at `proxy_addr` (`host:port`).
    pub fn new(proxy_addr: impl Into<String>, policy: ResolutionPolicy) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            credentials: None,
            policy,
            resolver: Arc::new(SystemResolver),
            cancel: CancellationToken::new(),
            span: Span::none(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Token that aborts every dial made through the `Service` impl.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    /// Open a tunnel to `host:port`, giving up as soon as `cancel` fires.
    pub async fn dial(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<TcpStream, DialError> {
        let attempt = self.dial_uncancellable(host, port);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DialError::Cancelled),
            result = attempt => result,
        };

        if let Err(e) = &result {
            debug!(parent: &self.span, host, port, error = %e, "Dial failed");
        }
        result
    }

    async fn dial_uncancellable(&self, host: &str, port: u16) -> Result<TcpStream, DialError> {
        let target = self.target_for(host, port).await?;

        let mut stream = TcpStream::connect(&self.proxy_addr)
            .await
            .map_err(|source| DialError::ProxyUnreachable {
                proxy: self.proxy_addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(parent: &self.span, proxy = %self.proxy_addr, error = %e, "Could not disable Nagle");
        }

        socks5::connect(&mut stream, &target, self.credentials.as_ref())
            .await
            .map_err(|source| DialError::Handshake {
                proxy: self.proxy_addr.clone(),
                source,
            })?;

        debug!(parent: &self.span, %target, proxy = %self.proxy_addr, "Tunnel established");
        Ok(stream)
    }

    async fn target_for(&self, host: &str, port: u16) -> Result<TargetAddr, DialError> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');

        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(TargetAddr::Ip(SocketAddr::new(ip, port)));
        }

        match self.policy {
            ResolutionPolicy::Remote => Ok(TargetAddr::Domain(bare.to_string(), port)),
            ResolutionPolicy::Local => {
                let addrs = self
                    .resolver
                    .resolve(bare)
                    .await
                    .map_err(|source| DialError::Resolve {
                        host: bare.to_string(),
                        source,
                    })?;
                let ip = addrs.first().copied().ok_or_else(|| DialError::NoAddresses {
                    host: bare.to_string(),
                })?;
                debug!(parent: &self.span, host = bare, %ip, "Resolved locally");
                Ok(TargetAddr::Ip(SocketAddr::new(ip, port)))
            }
        }
    }
}

impl Service<Uri> for ProxyDialer {
    type Response = TokioIo<TcpStream>;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dialer = self.clone();
        let span = self.span.clone();
        Box::pin(
            async move {
                let host = uri
                    .host()
                    .ok_or_else(|| DialError::MissingHost(uri.to_string()))?
                    .to_string();
                let port = uri.port_u16().unwrap_or_else(|| {
                    if uri.scheme_str() == Some("https") {
                        443
                    } else {
                        80
                    }
                });
                let cancel = dialer.cancel.clone();
                let stream = dialer.dial(&host, port, &cancel).await?;
                Ok(TokioIo::new(stream))
            }
            .instrument(span),
        )
    }
}
