//! SOCKS5 JSON-RPC bridge library.
//!
//! Relays newline-delimited JSON-RPC between a local stream pair and a remote
//! HTTP server that is only reachable through a SOCKS5 proxy.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;
pub mod transport;

pub use config::schema::BridgeConfig;
pub use error::{BridgeError, ErrorKind};
pub use lifecycle::{Bridge, Shutdown};
pub use relay::{RelayEngine, RunOutcome};
