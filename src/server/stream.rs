//! Stream channel: one download task per connection, NDJSON event lifecycle
//!
//! The first line of a connection must be a `download` command; the handler
//! then relays `start` → `progress`*/`merging`* → exactly one terminal
//! (`done`, `error` or `cancelled`) and emits nothing after the terminal.
//! Any other first command, a malformed first line, or a second command
//! after the task all yield a single terminal `error` event with no task
//! started.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;

use super::Bridge;
use crate::engine::{
    DownloadProgress, HookAction, PostprocessStatus, PostprocessUpdate, ProgressSink,
    ProgressStatus,
};
use crate::error::{EngineError, ErrorCode, ErrorRecord, Result, classify};
use crate::events::EventWriter;
use crate::registry::TaskRegistry;
use crate::types::{DownloadRequest, StreamEvent, StreamRequest};

/// Details string of the `merging` event that follows the final `progress`
///
/// Exact text is part of the client contract; do not reword.
const MERGING_START_DETAILS: &str = "postprocessing (merge/mux) starting";

pub(crate) async fn handle_connection(bridge: Bridge, socket: TcpStream) -> Result<()> {
    let (reader, writer) = socket.into_split();
    handle_stream(bridge, BufReader::new(reader), writer).await
}

/// Run the single-command stream protocol over any buffered byte stream
pub(crate) async fn handle_stream<R, W>(bridge: Bridge, mut reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut events = EventWriter::new(writer);
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        // Client connected and went away without a request.
        return Ok(());
    }

    let request = match parse_request(&buf) {
        Ok(StreamRequest::Download(request)) => request,
        Ok(StreamRequest::Unknown { cmd }) => {
            send_terminal_error(
                &mut events,
                ErrorCode::UnsupportedCmd,
                format!("cmd={cmd}"),
            )
            .await;
            return Ok(());
        }
        Err(detail) => {
            send_terminal_error(&mut events, ErrorCode::BadRequest, detail).await;
            return Ok(());
        }
    };

    run_download(&bridge, request, &mut events).await;

    // Single-command-per-connection: the client is expected to close now.
    // Anything else it sends is rejected without starting a task.
    buf.clear();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(());
    }
    let cmd = match parse_request(&buf) {
        Ok(StreamRequest::Download(_)) => "download".to_string(),
        Ok(StreamRequest::Unknown { cmd }) => cmd,
        Err(_) => String::new(),
    };
    send_terminal_error(&mut events, ErrorCode::UnsupportedCmd, format!("cmd={cmd}")).await;
    Ok(())
}

/// Decode and parse one request line
fn parse_request(buf: &[u8]) -> std::result::Result<StreamRequest, String> {
    let text =
        std::str::from_utf8(buf).map_err(|e| format!("invalid json line: invalid utf-8: {e}"))?;
    StreamRequest::parse(text.trim()).map_err(|e| format!("invalid json line: {e}"))
}

/// Best-effort terminal error; a vanished client must not mask the failure
async fn send_terminal_error<W>(events: &mut EventWriter<W>, code: ErrorCode, message: String)
where
    W: AsyncWrite + Unpin + Send,
{
    events
        .send(&StreamEvent::error(ErrorRecord::new(code, message)))
        .await
        .ok();
}

/// Execute one download task and emit its full event lifecycle
///
/// The registry entry (when the request carries a task id) lives exactly as
/// long as this call: an RAII guard removes it on every exit, so the
/// registry never leaks entries for finished, failed, or cancelled tasks.
pub(crate) async fn run_download<W>(
    bridge: &Bridge,
    request: DownloadRequest,
    events: &mut EventWriter<W>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let task_id = request.task_id();
    let _guard = bridge.registry().register_scoped(task_id.as_deref());

    // Instant feedback, before the engine touches the network.
    if events.send(&StreamEvent::start(&request)).await.is_err() {
        tracing::debug!(url = %request.url, "stream client disconnected before start event");
        return;
    }

    tracing::info!(
        url = %request.url,
        task_id = task_id.as_deref().unwrap_or(""),
        "download task started"
    );

    let spec = request.to_spec();
    let (outcome, cancelled_emitted, writer_gone) = {
        let mut sink = StreamSink {
            events: &mut *events,
            registry: bridge.registry().clone(),
            task_id: task_id.clone(),
            cancelled_emitted: false,
            writer_gone: false,
        };
        let outcome = bridge.engine().download(&spec, &mut sink).await;
        (outcome, sink.cancelled_emitted, sink.writer_gone)
    };

    match outcome {
        Ok(()) => {
            tracing::info!(url = %request.url, "download task completed");
            events.send(&StreamEvent::done()).await.ok();
        }
        Err(EngineError::Aborted) => {
            if cancelled_emitted {
                tracing::info!(url = %request.url, "download task cancelled");
            } else if writer_gone {
                tracing::debug!(url = %request.url, "download task dropped with its client");
            } else {
                // Aborted without a prior cancelled emission (engine-side
                // abort); the client still gets its one terminal event.
                events
                    .send(&StreamEvent::cancelled(task_id.as_deref()))
                    .await
                    .ok();
            }
        }
        Err(EngineError::Download(message)) => {
            let code = classify(&message);
            tracing::warn!(url = %request.url, code = %code, error = %message, "download task failed");
            events
                .send(&StreamEvent::error(ErrorRecord::new(code, message)))
                .await
                .ok();
        }
        Err(error) => {
            tracing::error!(url = %request.url, error = %error, "download task failed unexpectedly");
            events
                .send(&StreamEvent::error(ErrorRecord::new(
                    ErrorCode::Unknown,
                    error.to_string(),
                )))
                .await
                .ok();
        }
    }
}

/// Adapter between engine callbacks and the wire event stream
///
/// Before forwarding any callback it polls the registry's cancellation
/// flag; a set flag emits the terminal `cancelled` event and returns
/// [`HookAction::Abort`] so the engine stops work. A failed event write
/// (client gone) also aborts, without emitting anything further.
struct StreamSink<'a, W> {
    events: &'a mut EventWriter<W>,
    registry: TaskRegistry,
    task_id: Option<String>,
    cancelled_emitted: bool,
    writer_gone: bool,
}

impl<W: AsyncWrite + Unpin + Send> StreamSink<'_, W> {
    /// Emit `cancelled` and report whether the task should abort
    async fn poll_cancel(&mut self) -> bool {
        let Some(task_id) = self.task_id.as_deref() else {
            return false;
        };
        if !self.registry.is_cancelled(task_id) {
            return false;
        }
        if !self.cancelled_emitted {
            self.events
                .send(&StreamEvent::cancelled(Some(task_id)))
                .await
                .ok();
            self.cancelled_emitted = true;
        }
        true
    }

    fn after_write(&mut self, result: Result<()>) -> HookAction {
        match result {
            Ok(()) => HookAction::Continue,
            Err(e) => {
                tracing::debug!(error = %e, "stream client went away, aborting task");
                self.writer_gone = true;
                HookAction::Abort
            }
        }
    }
}

#[async_trait]
impl<'a, W: AsyncWrite + Unpin + Send> ProgressSink for StreamSink<'a, W> {
    async fn on_progress(&mut self, progress: DownloadProgress) -> HookAction {
        if self.poll_cancel().await {
            return HookAction::Abort;
        }
        let result = match progress.status {
            ProgressStatus::Downloading => {
                self.events.send(&StreamEvent::downloading(&progress)).await
            }
            ProgressStatus::Finished => {
                // The finished marker is immediately followed by the merging
                // transition; this ordering is client-observed contract.
                match self
                    .events
                    .send(&StreamEvent::download_finished(progress.filename.clone()))
                    .await
                {
                    Ok(()) => self.events.send(&StreamEvent::merging(MERGING_START_DETAILS)).await,
                    Err(e) => Err(e),
                }
            }
        };
        self.after_write(result)
    }

    async fn on_postprocess(&mut self, update: PostprocessUpdate) -> HookAction {
        if self.poll_cancel().await {
            return HookAction::Abort;
        }
        let details = match update.status {
            PostprocessStatus::Started => format!("{} started", update.processor),
            PostprocessStatus::Finished => format!("{} finished", update.processor),
        };
        let result = self.events.send(&StreamEvent::merging(details)).await;
        self.after_write(result)
    }
}
