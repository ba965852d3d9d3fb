//! NDJSON event writer for the stream channel
//!
//! One JSON object per line, flushed immediately after each write so the
//! remote end observes progress in near real time. The writer is generic
//! over any `AsyncWrite` so handlers can be exercised in tests without a
//! socket.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::types::StreamEvent;

/// Current time as floating-point seconds since the Unix epoch
///
/// Timestamps are assigned at emission time; they are monotonic per
/// connection only by construction order, not across connections.
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Serializes stream events to NDJSON, one line per event
///
/// Each [`send`](EventWriter::send) produces exactly one LF-terminated,
/// compact JSON line and flushes before returning. A single writer owns a
/// connection's write half, which is what guarantees strict per-task event
/// ordering: there is no buffer that could reorder.
pub struct EventWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> EventWriter<W> {
    /// Wrap a write half
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize one event as a JSON line and flush it
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error (e.g. broken pipe when the client
    /// disconnected). Callers on terminal paths deliberately swallow this so
    /// a dead peer never masks the primary outcome.
    pub async fn send(&mut self, event: &StreamEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Consume the writer and return the underlying write half
    pub fn into_inner(self) -> W {
        self.writer
    }
}
