//! Legacy single-port control server
//!
//! Historical protocol variant kept for older clients: one port speaking
//! `{"cmd":"version"|"json", …}` where `json` behaves like `videometa`.
//! Response strings match the historical server exactly, including its
//! loose input handling (lossy UTF-8 decode, per-line error responses).
//! Disabled unless a legacy port is configured.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;

use super::control::{metadata_payload, version_payload};
use super::{Bridge, write_json_line};
use crate::error::Result;
use crate::types::MetaRequest;

/// How long the single-instance probe waits for a connect
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Probe whether something is already accepting connections on `addr`
///
/// Used as the single-instance guard before binding the legacy port: when
/// another instance is already serving, the caller skips binding cleanly
/// instead of failing with an address-in-use error.
pub async fn port_in_use(addr: &str) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

pub(crate) async fn handle_connection(bridge: Bridge, socket: TcpStream) -> Result<()> {
    let (reader, writer) = socket.into_split();
    handle_lines(bridge, BufReader::new(reader), writer).await
}

/// Request/response loop with the historical error strings
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
        // The historical server decoded with errors ignored; lossy decode
        // keeps byte junk from ending the connection.
        let text = String::from_utf8_lossy(&buf);
        let response = dispatch(&bridge, text.trim()).await;
        write_json_line(&mut writer, &response).await?;
    }
}

async fn dispatch(bridge: &Bridge, line: &str) -> Value {
    if line.is_empty() {
        return json!({"ok": false, "error": "empty line"});
    }
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return json!({"ok": false, "error": "invalid json input"});
    };
    match value.get("cmd").and_then(Value::as_str) {
        Some("version") => version_payload(bridge).await,
        Some("json") => match serde_json::from_value::<MetaRequest>(value.clone()) {
            Ok(request) => metadata_payload(bridge, &request).await,
            Err(_) => json!({"ok": false, "error": "invalid json input"}),
        },
        Some(other) => json!({"ok": false, "error": format!("unknown cmd: {other}")}),
        None => json!({"ok": false, "error": "unknown cmd: "}),
    }
}
