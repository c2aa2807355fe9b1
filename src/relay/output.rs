//! Serialized writer for the local output stream.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use super::jsonrpc;
use crate::observability::metrics::{self, Direction};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One writer shared by both pumps. Each line is written whole and flushed
/// before the lock is released.
pub struct OutputSink {
    writer: Mutex<BoxedWriter>,
}

impl OutputSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Write `line` plus a newline and flush.
    pub async fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Forward a message from the peer. Returns `Ok(false)` when the payload
    /// is not JSON and was dropped.
    pub async fn deliver(&self, payload: &[u8]) -> io::Result<bool> {
        let Some(line) = jsonrpc::to_single_line(payload) else {
            warn!(bytes = payload.len(), "Dropping non-JSON message from server");
            return Ok(false);
        };
        self.write_line(&line).await?;
        metrics::record_message(Direction::ToLocal);
        Ok(true)
    }

    pub async fn flush(&self) -> io::Result<()> {
        self.writer.lock().await.flush().await
    }
}
