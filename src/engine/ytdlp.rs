//! CLI-based download engine driving the external yt-dlp binary
//!
//! Progress hooks are wired through yt-dlp's `--progress-template` with a
//! JSON template: each progress or post-processing notification arrives as
//! one JSON object per stdout line, which this adapter parses and forwards
//! to the [`ProgressSink`]. An `Abort` from the sink kills the child
//! process.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{
    DownloadEngine, DownloadProgress, HookAction, PostprocessStatus, PostprocessUpdate,
    ProgressSink, ProgressStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::types::{DownloadSpec, MetaQuery};

/// Output template used when the request does not supply one
const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Upper bound on captured stderr, to keep failure diagnostics bounded
const STDERR_CAP_BYTES: u64 = 64 * 1024;

/// CLI-based engine using the external `yt-dlp` binary
///
/// Construction never fails, even when the binary is missing: failures
/// surface at invocation time, which is what lets the control channel's
/// `version` command degrade to `"unknown"` instead of erroring.
///
/// # Examples
///
/// ```no_run
/// use ydl_bridge::engine::YtDlpEngine;
/// use std::path::PathBuf;
///
/// // Create with an explicit path
/// let engine = YtDlpEngine::new(PathBuf::from("/usr/local/bin/yt-dlp"));
///
/// // Or auto-discover from PATH
/// let engine = YtDlpEngine::from_path().expect("yt-dlp not found in PATH");
/// ```
pub struct YtDlpEngine {
    binary_path: PathBuf,
}

impl YtDlpEngine {
    /// Create a new engine with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `yt-dlp` in PATH
    ///
    /// Uses the `which` crate to search the system PATH. Returns
    /// `Some(YtDlpEngine)` if the binary is found, `None` otherwise.
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// The configured binary path
    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }
}

#[async_trait]
impl DownloadEngine for YtDlpEngine {
    async fn version(&self) -> EngineResult<String> {
        let output = Command::new(&self.binary_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Tool(format!("failed to execute yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(EngineError::Tool(format!(
                "yt-dlp --version exited with {}",
                output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            return Err(EngineError::Output("empty version string".into()));
        }
        Ok(version)
    }

    async fn fetch_metadata(&self, query: &MetaQuery) -> EngineResult<Value> {
        let output = Command::new(&self.binary_path)
            .args(metadata_args(query))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Tool(format!("failed to execute yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Download(extract_error_message(
                &stderr,
                &output.status.to_string(),
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Output(format!("metadata was not valid JSON: {e}")))
    }

    async fn download(
        &self,
        spec: &DownloadSpec,
        sink: &mut (dyn ProgressSink + Send),
    ) -> EngineResult<()> {
        let mut child = Command::new(&self.binary_path)
            .args(download_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Tool(format!("failed to execute yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Tool("yt-dlp stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Tool("yt-dlp stderr was not captured".into()))?;

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let mut reader = BufReader::new(stderr).take(STDERR_CAP_BYTES);
            reader.read_to_string(&mut text).await.ok();
            text
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::Tool(format!("failed to read yt-dlp output: {e}")))?
        {
            let Some(callback) = parse_progress_line(&line) else {
                continue;
            };
            let action = match callback {
                EngineCallback::Download(progress) => sink.on_progress(progress).await,
                EngineCallback::Postprocess(update) => sink.on_postprocess(update).await,
            };
            if action == HookAction::Abort {
                tracing::debug!(url = %spec.url, "aborting yt-dlp invocation");
                child.start_kill().ok();
                child
                    .wait()
                    .await
                    .map_err(|e| EngineError::Tool(format!("failed to reap yt-dlp: {e}")))?;
                return Err(EngineError::Aborted);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::Tool(format!("failed to reap yt-dlp: {e}")))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Download(extract_error_message(
                &stderr_text,
                &status.to_string(),
            )))
        }
    }

    fn name(&self) -> &'static str {
        "cli-yt-dlp"
    }
}

/// Arguments for a metadata-only extraction
///
/// Mirrors the fixed engine-side options: single-JSON dump, no playlist
/// expansion, relaxed certificate validation, quiet output.
fn metadata_args(query: &MetaQuery) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--dump-single-json",
        "--no-check-certificates",
        "--no-playlist",
        "--quiet",
        "--no-warnings",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    if let Some(cookies) = &query.cookie_file {
        args.push("--cookies".into());
        args.push(cookies.into());
    }
    if let Some(proxy) = &query.proxy {
        args.push("--proxy".into());
        args.push(proxy.into());
    }
    args.push("--".into());
    args.push(query.url.as_str().into());
    args
}

/// Arguments for a download invocation
///
/// Retry counts, fragment concurrency, and the mp4 merge target are fixed
/// engine-side configuration, not exposed over the wire.
fn download_args(spec: &DownloadSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--quiet",
        "--no-warnings",
        "--newline",
        "--progress",
        "--progress-template",
        "download:%(progress)j",
        "--progress-template",
        "postprocess:%(progress)j",
        "--continue",
        "--merge-output-format",
        "mp4",
        "--retries",
        "3",
        "--fragment-retries",
        "3",
        "--concurrent-fragments",
        "3",
        "--output",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(
        spec.output_template
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_TEMPLATE)
            .into(),
    );

    if let Some(format) = &spec.format {
        args.push("--format".into());
        args.push(format.into());
    }
    if let Some(cookies) = &spec.cookie_file {
        args.push("--cookies".into());
        args.push(cookies.into());
    }
    if let Some(proxy) = &spec.proxy {
        args.push("--proxy".into());
        args.push(proxy.into());
    }
    args.push("--".into());
    args.push(spec.url.as_str().into());
    args
}

/// A parsed progress-template line
enum EngineCallback {
    Download(DownloadProgress),
    Postprocess(PostprocessUpdate),
}

/// Parse one stdout line emitted by the JSON progress template
///
/// Non-JSON lines (stray output) and unknown statuses are skipped rather
/// than treated as errors. A `postprocessor` key distinguishes
/// post-processing callbacks from download callbacks.
fn parse_progress_line(line: &str) -> Option<EngineCallback> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let object = value.as_object()?;
    let status = object.get("status")?.as_str()?;

    if let Some(processor) = object.get("postprocessor").and_then(Value::as_str) {
        let status = match status {
            "started" | "processing" => PostprocessStatus::Started,
            "finished" => PostprocessStatus::Finished,
            _ => return None,
        };
        return Some(EngineCallback::Postprocess(PostprocessUpdate {
            status,
            processor: processor.to_string(),
        }));
    }

    let status = match status {
        "downloading" => ProgressStatus::Downloading,
        "finished" => ProgressStatus::Finished,
        _ => return None,
    };
    Some(EngineCallback::Download(DownloadProgress {
        status,
        downloaded_bytes: as_u64(object.get("downloaded_bytes")),
        total_bytes: as_u64(object.get("total_bytes"))
            .or_else(|| as_u64(object.get("total_bytes_estimate"))),
        speed_bps: as_f64(object.get("speed")),
        eta_seconds: as_u64(object.get("eta")),
        filename: object
            .get("filename")
            .and_then(Value::as_str)
            .map(String::from),
    }))
}

/// Coerce a JSON value to `u64`, reporting absence for anything that does
/// not coerce (`"NA"`, nulls, negatives) rather than defaulting
fn as_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to `f64`, reporting absence for anything that does
/// not coerce rather than defaulting
fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Pull the most useful failure line out of yt-dlp's stderr
///
/// yt-dlp prefixes fatal problems with `ERROR:`; prefer the last such line,
/// fall back to the last non-empty line, and synthesize a message from the
/// exit status when stderr was silent.
fn extract_error_message(stderr: &str, status: &str) -> String {
    let last_error = stderr
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with("ERROR:"));
    if let Some(line) = last_error {
        return line.trim().to_string();
    }
    if let Some(line) = stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        return line.trim().to_string();
    }
    format!("yt-dlp exited with {status}")
}
