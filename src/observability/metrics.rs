//! Relay metrics.
//!
//! # Metrics
//! - `bridge_messages_total` (counter): relayed messages by `direction`
//!   (`to_remote`, `to_local`)
//! - `bridge_send_errors_total` (counter): sends answered with a synthetic error
//! - `bridge_malformed_lines_total` (counter): input lines dropped, by `reason`
//! - `bridge_connection_state` (gauge): see `ConnectionState::as_gauge`
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade only; without an installed
//!   recorder every call is a no-op
//! - No exporter is started here: stdout carries the protocol and the process
//!   has no listener of its own

use crate::net::ConnectionState;

/// Direction of a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToRemote,
    ToLocal,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToRemote => "to_remote",
            Direction::ToLocal => "to_local",
        }
    }
}

pub fn record_message(direction: Direction) {
    metrics::counter!("bridge_messages_total", "direction" => direction.as_str()).increment(1);
}

pub fn record_send_error() {
    metrics::counter!("bridge_send_errors_total").increment(1);
}

pub fn record_malformed_line(reason: &'static str) {
    metrics::counter!("bridge_malformed_lines_total", "reason" => reason).increment(1);
}

pub fn record_connection_state(state: ConnectionState) {
    metrics::gauge!("bridge_connection_state").set(state.as_gauge());
}
