//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP client connector call (Uri)
//!     → dialer.rs (resolution policy, cancellation)
//!     → resolver.rs (local lookups only)
//!     → socks5.rs (greeting, auth, CONNECT)
//!     → tunnelled TcpStream handed back to the HTTP client
//!
//! Connection States (connection.rs):
//!     Unconnected → Connecting → Active → Closed | Failed
//! ```
//!
//! # Design Decisions
//! - Every connection goes through the proxy; there is no direct path
//! - Hostnames resolve locally or on the proxy depending on the URL scheme
//! - The dialer is a plain `tower::Service`, so any hyper connector can wrap it

pub mod connection;
pub mod dialer;
pub mod resolver;
pub mod socks5;

pub use connection::{ConnectionState, ConnectionTracker};
pub use dialer::{DialError, ProxyDialer, ResolutionPolicy};
pub use resolver::{Resolve, SystemResolver};
pub use socks5::Credentials;
