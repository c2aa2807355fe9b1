//! Relay engine: the bidirectional pump between the local streams and the
//! remote transport.
//!
//! # Data Flow
//! ```text
//! local input ──▶ inbound.rs ──send──▶ Transport ──▶ remote peer
//!                    │ (inline replies, synthetic errors)
//!                    ▼
//!               output.rs ◀── outbound.rs ◀──receive── Transport
//!                    │            (background delivery only)
//!                    ▼
//!               local output
//! ```
//!
//! # Design Decisions
//! - Connect exactly once; a failed connect ends the run
//! - The engine waits for the first of: cancellation, a pump ending, local
//!   EOF. Then one teardown path closes the transport and flushes output
//! - Pumps run under a child token so teardown can stop them without
//!   cancelling the caller

pub mod inbound;
pub mod jsonrpc;
pub mod outbound;
pub mod output;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::BridgeError;
use crate::net::{ConnectionState, ConnectionTracker};
use crate::transport::{Delivery, Transport, TransportError};

use inbound::InboundPump;
use outbound::OutboundPump;
use output::OutputSink;

/// How long teardown waits for each pump before aborting it.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a pump stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    Cancelled,
    InputClosed,
}

/// How a run ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown was requested.
    Cancelled,
    /// The local client closed its input.
    InputClosed,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Longest accepted input line, newline included.
    pub max_line_bytes: usize,
    /// Outbound read timeout; expiry only means "try again".
    pub read_timeout: Duration,
    /// After local EOF, how long to keep forwarding server messages.
    pub eof_linger: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_line_bytes: 10 * 1024 * 1024,
            read_timeout: Duration::from_secs(30),
            eof_linger: Duration::from_secs(1),
        }
    }
}

enum FirstEvent {
    Cancelled,
    Inbound(Result<Result<PumpExit, BridgeError>, JoinError>),
    Outbound(Result<Result<PumpExit, BridgeError>, JoinError>),
}

type PumpHandle = JoinHandle<Result<PumpExit, BridgeError>>;

pub struct RelayEngine {
    transport: Arc<dyn Transport>,
    settings: RelaySettings,
    tracker: ConnectionTracker,
    span: Span,
}

impl RelayEngine {
    pub fn new(transport: Arc<dyn Transport>, settings: RelaySettings, span: Span) -> Self {
        Self {
            transport,
            settings,
            tracker: ConnectionTracker::new(),
            span,
        }
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.tracker.subscribe()
    }

    /// Connect, relay until something ends the run, then tear down.
    pub async fn run<R, W>(
        &self,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, BridgeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.run_inner(input, output, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn run_inner<R, W>(
        &self,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, BridgeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.tracker.transition(ConnectionState::Connecting);
        info!(transport = %self.transport.kind(), "Connecting to remote server");

        if let Err(e) = self.transport.connect(&cancel).await {
            self.transport.close().await;
            if matches!(e, TransportError::Cancelled) && cancel.is_cancelled() {
                self.tracker.transition(ConnectionState::Closed);
                info!("Shutdown requested before connection was established");
                return Ok(RunOutcome::Cancelled);
            }
            self.tracker.transition(ConnectionState::Failed);
            return Err(BridgeError::connect_failed(e));
        }
        self.tracker.transition(ConnectionState::Active);
        info!("Connected to remote server");

        let pumps = cancel.child_token();
        let output = Arc::new(OutputSink::new(output));

        let mut inbound: Option<PumpHandle> = Some(tokio::spawn(
            InboundPump {
                transport: Arc::clone(&self.transport),
                output: Arc::clone(&output),
                max_line_bytes: self.settings.max_line_bytes,
                cancel: pumps.clone(),
            }
            .run(BufReader::new(input))
            .in_current_span(),
        ));

        let mut outbound: Option<PumpHandle> = match self.transport.delivery() {
            Delivery::Background => Some(tokio::spawn(
                OutboundPump {
                    transport: Arc::clone(&self.transport),
                    output: Arc::clone(&output),
                    read_timeout: self.settings.read_timeout,
                    cancel: pumps.clone(),
                }
                .run()
                .in_current_span(),
            )),
            Delivery::Inline => None,
        };

        let first = tokio::select! {
            _ = cancel.cancelled() => FirstEvent::Cancelled,
            joined = join_slot(&mut inbound) => FirstEvent::Inbound(joined),
            joined = join_slot(&mut outbound) => FirstEvent::Outbound(joined),
        };

        let result = match first {
            FirstEvent::Cancelled => {
                info!("Shutdown requested");
                Ok(RunOutcome::Cancelled)
            }
            FirstEvent::Inbound(joined) => match flatten(joined) {
                Ok(PumpExit::InputClosed) => {
                    self.linger(&mut outbound, &cancel).await;
                    Ok(RunOutcome::InputClosed)
                }
                Ok(PumpExit::Cancelled) => Ok(RunOutcome::Cancelled),
                Err(e) => Err(e),
            },
            FirstEvent::Outbound(joined) => flatten(joined).map(|_| RunOutcome::Cancelled),
        };

        self.teardown(pumps, [inbound, outbound], &output, result.is_err())
            .await;
        result
    }

    /// Keep forwarding server messages for a moment after local EOF, so
    /// replies to the last requests are not lost.
    async fn linger(&self, outbound: &mut Option<PumpHandle>, cancel: &CancellationToken) {
        if outbound.is_none() || self.settings.eof_linger.is_zero() {
            return;
        }
        debug!(linger = ?self.settings.eof_linger, "Input closed, draining server messages");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.settings.eof_linger) => {}
            joined = join_slot(outbound) => {
                if let Err(e) = flatten(joined) {
                    debug!(error = %e, "Outbound pump ended while draining");
                }
            }
        }
    }

    async fn teardown(
        &self,
        pumps: CancellationToken,
        handles: [Option<PumpHandle>; 2],
        output: &OutputSink,
        failed: bool,
    ) {
        pumps.cancel();
        self.transport.close().await;

        for handle in handles.into_iter().flatten() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(PUMP_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Pump did not stop in time, aborting");
                abort.abort();
            }
        }

        if let Err(e) = output.flush().await {
            debug!(error = %e, "Final output flush failed");
        }

        let state = if failed {
            ConnectionState::Failed
        } else {
            ConnectionState::Closed
        };
        self.tracker.transition(state);
        info!(state = %state, "Relay stopped");
    }
}

/// Await the task in `slot` once; afterwards the slot is empty and the
/// future never resolves again.
async fn join_slot<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match slot.as_mut() {
        Some(handle) => {
            let joined = handle.await;
            *slot = None;
            joined
        }
        None => std::future::pending().await,
    }
}

fn flatten(
    joined: Result<Result<PumpExit, BridgeError>, JoinError>,
) -> Result<PumpExit, BridgeError> {
    joined.map_err(|e| BridgeError::Task(e.to_string()))?
}
