//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::validation::ValidationError;
use crate::net::{Credentials, ResolutionPolicy};
use crate::relay::RelaySettings;
use crate::transport::TransportSettings;

/// Default SOCKS port when the proxy URL has none.
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// SOCKS5 proxy settings.
    pub proxy: ProxyConfig,

    /// Remote JSON-RPC server.
    pub server: ServerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Local stream framing and delivery queue.
    pub relay: RelayConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl BridgeConfig {
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            request_timeout: self.timeouts.request,
            queue_capacity: self.relay.queue_capacity,
            max_event_bytes: self.relay.max_line_bytes,
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            max_line_bytes: self.relay.max_line_bytes,
            read_timeout: self.timeouts.read,
            eof_linger: self.relay.eof_linger,
        }
    }
}

/// Proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// `socks5://[user:pass@]host[:port]` resolves hostnames locally,
    /// `socks5h://...` lets the proxy resolve them.
    pub url: String,
}

/// Remote server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server URL (e.g., "http://remote:8080/sse").
    pub url: String,

    /// Wire transport selection.
    pub transport: TransportMode,
}

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Probe the server once and pick.
    #[default]
    Auto,
    /// Server-sent event stream.
    #[serde(alias = "streaming")]
    Sse,
    /// One POST per message.
    #[serde(alias = "http", alias = "request-response", alias = "streamable-http")]
    Streamable,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TransportMode::Auto),
            "sse" | "streaming" => Ok(TransportMode::Sse),
            "streamable" | "http" | "request-response" | "streamable-http" | "streamablehttp" => {
                Ok(TransportMode::Streamable)
            }
            other => Err(format!(
                "unknown transport '{}' (expected auto, sse or streamable)",
                other
            )),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Auto => f.write_str("auto"),
            TransportMode::Sse => f.write_str("sse"),
            TransportMode::Streamable => f.write_str("streamable"),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for each HTTP request (stream handshake, POST, probe).
    #[serde(with = "crate::config::duration")]
    pub request: Duration,

    /// Deadline for the transport detection probe.
    #[serde(with = "crate::config::duration")]
    pub detect: Duration,

    /// Outbound read timeout; expiry is retried, never fatal.
    #[serde(with = "crate::config::duration")]
    pub read: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            detect: Duration::from_secs(5),
            read: Duration::from_secs(30),
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Longest accepted input line in bytes.
    pub max_line_bytes: usize,

    /// Messages buffered between the transport and the local output.
    pub queue_capacity: usize,

    /// After local EOF, how long server messages are still forwarded.
    #[serde(with = "crate::config::duration")]
    pub eof_linger: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 10 * 1024 * 1024,
            queue_capacity: 100,
            eof_linger: Duration::from_secs(1),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected pretty or json)", other)),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive (e.g., "debug", "info,hyper=warn").
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Proxy endpoint resolved from `proxy.url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// `host:port` to open the TCP connection to.
    pub addr: String,
    pub policy: ResolutionPolicy,
    pub credentials: Option<Credentials>,
}

impl ProxySettings {
    pub fn from_url(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |message: String| ValidationError::new("proxy.url", message);

        if raw.trim().is_empty() {
            return Err(invalid("proxy address is required (use --proxy)".into()));
        }
        let url = url::Url::parse(raw.trim())
            .map_err(|e| invalid(format!("invalid proxy address format: {}", e)))?;

        let policy = match url.scheme() {
            "socks5" => ResolutionPolicy::Local,
            "socks5h" => ResolutionPolicy::Remote,
            _ => {
                return Err(invalid(
                    "proxy address must start with socks5:// or socks5h://".into(),
                ))
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(invalid("proxy address must include host".into())),
        };
        let port = url.port().unwrap_or(DEFAULT_SOCKS_PORT);

        let credentials = if url.username().is_empty() && url.password().is_none() {
            None
        } else {
            Some(Credentials::new(
                decode_userinfo(url.username()),
                decode_userinfo(url.password().unwrap_or_default()),
            ))
        };

        Ok(Self {
            addr: format!("{}:{}", host, port),
            policy,
            credentials,
        })
    }
}

/// Decode `%XX` escapes from URL userinfo. Malformed escapes stay literal.
fn decode_userinfo(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}
