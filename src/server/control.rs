//! Control channel: line-delimited JSON request/response dispatch
//!
//! One JSON request per line, one JSON response line back, flushed before
//! the next read. The connection survives malformed input: parse and
//! dispatch failures become structured `BAD_REQUEST` responses and the loop
//! keeps reading. EOF ends the handler without error.

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;

use super::{Bridge, write_json_line};
use crate::error::Result;
use crate::types::{ControlRequest, MetaQuery, MetaRequest};

pub(crate) async fn handle_connection(bridge: Bridge, socket: TcpStream) -> Result<()> {
    let (reader, writer) = socket.into_split();
    handle_lines(bridge, BufReader::new(reader), writer).await
}

/// Request/response loop over any buffered byte stream
pub(crate) async fn handle_lines<R, W>(bridge: Bridge, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let response = match std::str::from_utf8(&buf) {
            Ok(text) => dispatch(&bridge, text.trim()).await,
            Err(e) => bad_request(&format!("invalid utf-8: {e}")),
        };
        write_json_line(&mut writer, &response).await?;
    }
}

/// Map one request line to its response payload
///
/// Per-request catch-all: nothing that goes wrong here ends the connection.
async fn dispatch(bridge: &Bridge, line: &str) -> Value {
    match ControlRequest::parse(line) {
        Ok(ControlRequest::Version) => version_payload(bridge).await,
        Ok(ControlRequest::VideoMeta(request)) => metadata_payload(bridge, &request).await,
        Ok(ControlRequest::Unknown { cmd }) => {
            json!({"ok": false, "error": format!("UNSUPPORTED_CMD: {cmd}")})
        }
        Err(e) => bad_request(&e.to_string()),
    }
}

fn bad_request(detail: &str) -> Value {
    json!({"ok": false, "error": format!("BAD_REQUEST: {detail}")})
}

/// `version` response; never fails
///
/// An unreachable engine (missing binary, broken install) degrades to
/// `"unknown"` rather than an error response.
pub(crate) async fn version_payload(bridge: &Bridge) -> Value {
    let version = match bridge.engine().version().await {
        Ok(version) => version,
        Err(e) => {
            tracing::debug!(error = %e, "engine version query failed, reporting unknown");
            "unknown".to_string()
        }
    };
    json!({"ok": true, "version": version})
}

/// `videometa` response: the engine's metadata object verbatim, or a
/// structured failure
///
/// Passthrough responses are not wrapped in any envelope; the client gets
/// exactly what the engine produced.
pub(crate) async fn metadata_payload(bridge: &Bridge, request: &MetaRequest) -> Value {
    let Some(url) = request.url.as_deref().filter(|url| !url.is_empty()) else {
        return json!({"ok": false, "error": "missing url"});
    };
    let query = MetaQuery {
        url: url.to_string(),
        cookie_file: request.cookie_file(),
        proxy: request.proxy.clone(),
    };
    match bridge.engine().fetch_metadata(&query).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(url = %query.url, error = %e, "metadata extraction failed");
            json!({"ok": false, "error": e.to_string()})
        }
    }
}
