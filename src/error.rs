//! Top-level error taxonomy.
//!
//! Every failure that can end a run is a [`BridgeError`]. Its [`ErrorKind`]
//! is what gets logged as `error_kind` and decides the operator hint.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Machine-classifiable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ProxyConnection,
    RemoteConnection,
    Send,
    MalformedInput,
    ReadTimeout,
    StreamClosed,
    LocalStream,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ProxyConnection => "proxy_connection",
            ErrorKind::RemoteConnection => "remote_connection",
            ErrorKind::Send => "send",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::ReadTimeout => "read_timeout",
            ErrorKind::StreamClosed => "stream_closed",
            ErrorKind::LocalStream => "local_stream",
        }
    }

    /// Whether this kind ends the run.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            ErrorKind::Send | ErrorKind::MalformedInput | ErrorKind::ReadTimeout
        )
    }

    /// Operator hint printed next to fatal errors.
    pub fn remediation(self) -> Option<&'static str> {
        match self {
            ErrorKind::Configuration => {
                Some("Invalid configuration. Run with --help for usage.")
            }
            ErrorKind::ProxyConnection => Some(
                "Cannot connect to SOCKS proxy. Please check:\n\
                 \x20 1. The SOCKS proxy is running\n\
                 \x20 2. The proxy address is correct (e.g., socks5://localhost:1080)\n\
                 \x20 3. The proxy credentials are correct\n\
                 \x20 4. No firewall is blocking the connection",
            ),
            ErrorKind::RemoteConnection => Some(
                "Cannot connect to the remote server. Please check:\n\
                 \x20 1. The server is running\n\
                 \x20 2. The server URL is correct\n\
                 \x20 3. The server is reachable through the SOCKS proxy",
            ),
            ErrorKind::StreamClosed => Some(
                "The remote server closed the connection. Restart the bridge to reconnect.",
            ),
            ErrorKind::LocalStream => Some("The local client went away."),
            ErrorKind::Send | ErrorKind::MalformedInput | ErrorKind::ReadTimeout => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal errors of a bridge run.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to SOCKS proxy: {source}")]
    ProxyConnection {
        #[source]
        source: TransportError,
    },

    #[error("failed to connect to remote server ({diagnosis}): {source}")]
    RemoteConnection {
        diagnosis: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("remote stream closed{}", cause_suffix(.cause))]
    StreamClosed { cause: Option<TransportError> },

    #[error("local input failed: {0}")]
    Input(#[source] io::Error),

    #[error("local output failed: {0}")]
    Output(#[source] io::Error),

    #[error("relay task failed: {0}")]
    Task(String),
}

fn cause_suffix(cause: &Option<TransportError>) -> String {
    match cause {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl BridgeError {
    /// Classify a failed connect attempt.
    pub fn connect_failed(source: TransportError) -> Self {
        if source.is_proxy_failure() {
            BridgeError::ProxyConnection { source }
        } else {
            let diagnosis = source.diagnosis();
            BridgeError::RemoteConnection { diagnosis, source }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Config(_) => ErrorKind::Configuration,
            BridgeError::ProxyConnection { .. } => ErrorKind::ProxyConnection,
            BridgeError::RemoteConnection { .. } => ErrorKind::RemoteConnection,
            BridgeError::StreamClosed { .. } => ErrorKind::StreamClosed,
            BridgeError::Input(_) | BridgeError::Output(_) | BridgeError::Task(_) => {
                ErrorKind::LocalStream
            }
        }
    }
}
