//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! Transport (GET stream / POST message / OPTIONS probe)
//!     → client.rs (deadline + cancellation)
//!     → hyper-rustls (TLS for https URLs)
//!     → net::ProxyDialer (SOCKS5 tunnel)
//!     → remote peer
//! ```

pub mod client;

pub use client::{empty_request, BufferedResponse, RemoteClient};

/// `Mcp-Session-Id` header echoed back to the server after it assigns one.
pub const SESSION_HEADER: &str = "mcp-session-id";
