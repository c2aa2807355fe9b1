//! Connection state machine for the remote peer.
//!
//! # Responsibilities
//! - Track the transport state (Unconnected → Connecting → Active → Closed/Failed)
//! - Publish every transition to observers without polling
//!
//! # Design Decisions
//! - A `watch` channel holds the latest state; late subscribers see it at once
//! - `Closed` and `Failed` are terminal: further transitions are ignored

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of the connection to the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Unconnected,
    /// Connect in progress.
    Connecting,
    /// Connected and relaying.
    Active,
    /// Closed by teardown.
    Closed,
    /// Ended by a fatal error.
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Numeric form used for the state gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            ConnectionState::Unconnected => 0.0,
            ConnectionState::Connecting => 1.0,
            ConnectionState::Active => 2.0,
            ConnectionState::Closed => 3.0,
            ConnectionState::Failed => 4.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Publishes connection state transitions.
#[derive(Debug)]
pub struct ConnectionTracker {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Unconnected);
        Self { tx }
    }

    /// Move to `next`. Returns false if the current state is terminal.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::debug!(state = %next, "Connection state changed");
            crate::observability::metrics::record_connection_state(next);
        }
        changed
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}
