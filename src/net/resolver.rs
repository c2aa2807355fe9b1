//! Local hostname resolution.
//!
//! # Responsibilities
//! - Resolve a hostname to a list of IP addresses on the bridge host
//! - Allow the dialer to swap in a different resolver (tests count calls)
//!
//! # Design Decisions
//! - Object-safe trait returning a boxed future, so the dialer can hold
//!   `Arc<dyn Resolve>` and stay `Clone`
//! - The system resolver goes through Tokio's `lookup_host`, which runs
//!   `getaddrinfo` on the blocking pool

use std::io;
use std::net::IpAddr;

use futures_util::future::BoxFuture;

/// Hostname resolver used by the dialer under the local resolution policy.
pub trait Resolve: Send + Sync {
    /// Resolve `host` to its addresses, in resolver order.
    fn resolve(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>> {
        // lookup_host wants a port; it is discarded again below.
        let query = format!("{}:0", host);
        Box::pin(async move {
            let addrs = tokio::net::lookup_host(query).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        })
    }
}
