//! Transport-level errors.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

use crate::net::DialError;

/// Errors raised by the HTTP client and the transports built on it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("request timed out after {}", pretty_duration(.0))]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("server returned status {status}{}", body_suffix(.body))]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("unexpected content type '{content_type}', expected 'text/event-stream'")]
    UnexpectedContentType { content_type: String },

    #[error("server reply is not valid JSON: {0}")]
    InvalidReply(#[source] serde_json::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] Box<dyn StdError + Send + Sync>),

    #[error("server reply exceeds {limit} bytes")]
    ReplyTooLarge { limit: usize },

    #[error("event exceeds {limit} bytes before its terminating blank line")]
    EventTooLarge { limit: usize },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport is closed")]
    Closed,
}

fn pretty_duration(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

fn body_suffix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl TransportError {
    /// The dial error buried in a client error's source chain, if any.
    pub fn dial_error(&self) -> Option<&DialError> {
        let TransportError::Http { source, .. } = self else {
            return None;
        };
        let mut current: Option<&(dyn StdError + 'static)> = Some(source);
        while let Some(err) = current {
            if let Some(dial) = err.downcast_ref::<DialError>() {
                return Some(dial);
            }
            current = err.source();
        }
        None
    }

    /// True when the request never got past the SOCKS5 proxy.
    pub fn is_proxy_failure(&self) -> bool {
        self.dial_error().is_some_and(DialError::is_proxy_failure)
    }

    /// Short operator-facing hint about why a connection attempt failed.
    pub fn diagnosis(&self) -> &'static str {
        if matches!(self, TransportError::Timeout(_)) {
            return "connection timed out, check network connectivity";
        }
        match self.dial_error() {
            Some(DialError::Resolve { .. } | DialError::NoAddresses { .. }) => {
                "cannot resolve host, check the URL"
            }
            Some(dial) if dial.io_kind() == Some(io::ErrorKind::ConnectionRefused) => {
                "connection refused, is the service running?"
            }
            Some(dial) if dial.io_kind() == Some(io::ErrorKind::TimedOut) => {
                "connection timed out, check network connectivity"
            }
            Some(DialError::Handshake { .. }) => "the proxy refused the tunnel",
            _ => "request failed",
        }
    }
}
