//! Inbound pump: local lines → transport.
//!
//! # Responsibilities
//! - Frame the local stream into lines of bounded size
//! - Drop blank, oversized and non-JSON lines without answering
//! - Send each valid line unchanged; answer failed sends with a synthetic
//!   JSON-RPC error
//! - For inline transports, write the replies right after each send

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::jsonrpc;
use super::output::OutputSink;
use super::PumpExit;
use crate::error::{BridgeError, ErrorKind};
use crate::observability::metrics::{self, Direction};
use crate::transport::{Delivery, Transport, TransportError};

#[derive(Debug, Error)]
pub(crate) enum FramingError {
    #[error("line exceeds {max_bytes} bytes")]
    LineTooLarge { max_bytes: usize },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one `\n`-terminated line into `buf`, at most `max_bytes` long.
///
/// Returns the number of bytes read, 0 at EOF. An oversized line is drained
/// up to its newline so the next call starts on a fresh line.
pub(crate) async fn bounded_read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0usize;
    let mut oversized = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return if oversized {
                Err(FramingError::LineTooLarge { max_bytes })
            } else {
                Ok(total)
            };
        }

        let (chunk_len, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        if !oversized && total + chunk_len > max_bytes {
            oversized = true;
            buf.clear();
        }
        if !oversized {
            buf.extend_from_slice(&available[..chunk_len]);
        }
        total += chunk_len;
        reader.consume(chunk_len);

        if complete {
            return if oversized {
                Err(FramingError::LineTooLarge { max_bytes })
            } else {
                Ok(total)
            };
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub(crate) struct InboundPump {
    pub transport: Arc<dyn Transport>,
    pub output: Arc<OutputSink>,
    pub max_line_bytes: usize,
    pub cancel: CancellationToken,
}

impl InboundPump {
    pub async fn run<R>(self, mut reader: R) -> Result<PumpExit, BridgeError>
    where
        R: AsyncBufRead + Unpin,
    {
        let inline = self.transport.delivery() == Delivery::Inline;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PumpExit::Cancelled),
                read = bounded_read_line(&mut reader, &mut buf, self.max_line_bytes) => read,
            };

            match read {
                Ok(0) => {
                    debug!("Local input closed");
                    return Ok(PumpExit::InputClosed);
                }
                Ok(_) => {}
                Err(FramingError::LineTooLarge { max_bytes }) => {
                    warn!(
                        max_bytes,
                        error_kind = ErrorKind::MalformedInput.as_str(),
                        "Skipping oversized input line"
                    );
                    metrics::record_malformed_line("too_large");
                    continue;
                }
                Err(FramingError::Io(e)) => return Err(BridgeError::Input(e)),
            }

            let line = strip_line_ending(&buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if !jsonrpc::is_valid(line) {
                warn!(
                    bytes = line.len(),
                    error_kind = ErrorKind::MalformedInput.as_str(),
                    "Skipping input line that is not valid JSON"
                );
                metrics::record_malformed_line("invalid_json");
                continue;
            }

            let message = Bytes::copy_from_slice(line);
            trace!(bytes = message.len(), "Forwarding message");
            match self.transport.send(message, &self.cancel).await {
                Ok(()) => metrics::record_message(Direction::ToRemote),
                Err(TransportError::Cancelled) if self.cancel.is_cancelled() => {
                    return Ok(PumpExit::Cancelled);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        error_kind = ErrorKind::Send.as_str(),
                        "Send failed, answering with error response"
                    );
                    metrics::record_send_error();
                    let response = jsonrpc::error_response(line, &e.to_string());
                    self.output
                        .write_line(&response)
                        .await
                        .map_err(BridgeError::Output)?;
                }
            }

            if inline {
                self.drain_replies().await?;
            }
        }
    }

    async fn drain_replies(&self) -> Result<(), BridgeError> {
        while let Some(reply) = self.transport.try_receive() {
            match reply {
                Ok(payload) => {
                    self.output
                        .deliver(&payload)
                        .await
                        .map_err(BridgeError::Output)?;
                }
                Err(e) => warn!(error = %e, "Discarding failed reply"),
            }
        }
        Ok(())
    }
}
