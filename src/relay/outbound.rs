//! Outbound pump: transport deliveries → local output.
//!
//! Only used with background-delivery transports. A read that sees nothing
//! within the read timeout is simply retried; the pump ends on cancellation
//! or when the transport reports the stream closed.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::output::OutputSink;
use super::PumpExit;
use crate::error::{BridgeError, ErrorKind};
use crate::transport::Transport;

pub(crate) struct OutboundPump {
    pub transport: Arc<dyn Transport>,
    pub output: Arc<OutputSink>,
    pub read_timeout: Duration,
    pub cancel: CancellationToken,
}

impl OutboundPump {
    pub async fn run(self) -> Result<PumpExit, BridgeError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PumpExit::Cancelled),
                next = tokio::time::timeout(self.read_timeout, self.transport.receive()) => next,
            };

            match next {
                Err(_) => {
                    trace!(error_kind = ErrorKind::ReadTimeout.as_str(), "No message yet");
                }
                Ok(None) => {
                    warn!(error_kind = ErrorKind::StreamClosed.as_str(), "Remote stream closed");
                    return Err(BridgeError::StreamClosed { cause: None });
                }
                Ok(Some(Err(e))) => {
                    warn!(
                        error = %e,
                        error_kind = ErrorKind::StreamClosed.as_str(),
                        "Remote stream failed"
                    );
                    return Err(BridgeError::StreamClosed { cause: Some(e) });
                }
                Ok(Some(Ok(payload))) => {
                    self.output
                        .deliver(&payload)
                        .await
                        .map_err(BridgeError::Output)?;
                }
            }
        }
    }
}
