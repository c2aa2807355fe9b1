//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Dialer → HTTP client → Detect (auto) → Transport → Relay
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Relay pumps stop → Transport closed → Output flushed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then network, then relay
//! - One cancellation token reaches dialing, HTTP requests and both pumps
//! - Teardown is bounded: pumps that do not stop in time are aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::listen_for_shutdown;
pub use startup::Bridge;
