//! Core protocol types: task states, stream events, and wire requests
//!
//! Everything in this module is part of the client-observed wire contract.
//! The NDJSON shape of [`StreamEvent`] in particular must stay stable: the
//! desktop client switches on the `event` tag and the `state` mirror, and
//! treats absent optional fields as "unknown" (never `null` or `0`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::DownloadProgress;
use crate::error::ErrorRecord;
use crate::events::now_ts;

/// Coarse task status mirrored into every stream event
///
/// Redundant with the event tag by design: simple clients consume `state`
/// alone, richer clients switch on `event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Download in progress
    Running,
    /// Post-processing (merge/mux) in progress
    Merging,
    /// Terminal: completed successfully
    Done,
    /// Terminal: failed or cancelled
    Failed,
}

/// Phase marker carried by `progress` events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    /// Bytes are being fetched
    Downloading,
    /// The fetch finished; post-processing is about to start
    Finished,
}

/// One NDJSON record pushed to a stream client
///
/// Serialized flat with an `event` tag, e.g.
/// `{"event":"progress","state":"running","ts":…,"phase":"downloading",…}`.
/// For a given task the sequence is `start`, zero or more
/// `progress`/`merging`, then exactly one terminal (`done`, `error` or
/// `cancelled`), and nothing after the terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Task accepted; emitted before any network activity
    Start {
        /// Status mirror (`running`)
        state: TaskState,
        /// Seconds since the Unix epoch, assigned at emission
        ts: f64,
        /// Requested URL
        url: String,
        /// Requested format selector, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        format_value: Option<String>,
        /// Requested output template, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        output_template: Option<String>,
        /// Caller-supplied task identifier, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },

    /// Download progress update
    Progress {
        /// Status mirror (`running`)
        state: TaskState,
        /// Seconds since the Unix epoch, assigned at emission
        ts: f64,
        /// Which phase this update belongs to
        phase: ProgressPhase,
        /// Bytes downloaded so far (absent when the engine did not report it)
        #[serde(skip_serializing_if = "Option::is_none")]
        downloaded: Option<u64>,
        /// Total bytes, exact or estimated (absent when unknown)
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        /// `downloaded / total`, present only when the total is known and positive
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        /// Current speed in bytes per second (absent when unknown)
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        /// Estimated seconds to completion (absent when unknown)
        #[serde(skip_serializing_if = "Option::is_none")]
        eta: Option<u64>,
        /// Target filename (absent when the engine did not report it)
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Post-processing activity (merge/mux stages)
    Merging {
        /// Status mirror (`merging`)
        state: TaskState,
        /// Seconds since the Unix epoch, assigned at emission
        ts: f64,
        /// Human-readable stage description
        details: String,
    },

    /// Terminal: the task completed successfully
    Done {
        /// Status mirror (`done`)
        state: TaskState,
        /// Seconds since the Unix epoch, assigned at emission
        ts: f64,
        /// Always `true`
        ok: bool,
    },

    /// Terminal: the task failed
    Error {
        /// Status mirror (`failed`)
        state: TaskState,
        /// Seconds since the Unix epoch, assigned at emission
        ts: f64,
        /// Classified error record
        error: ErrorRecord,
    },

    /// Terminal: the task was cancelled (distinct from `error` by contract)
    Cancelled {
        /// Status mirror (`failed`; cancellation is a sub-case of failure)
        state: TaskState,
        /// Seconds since the Unix epoch, assigned at emission
        ts: f64,
        /// Caller-supplied task identifier, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
}

impl StreamEvent {
    /// Build the `start` event for a download request
    pub fn start(request: &DownloadRequest) -> Self {
        StreamEvent::Start {
            state: TaskState::Running,
            ts: now_ts(),
            url: request.url.clone(),
            format_value: request.format_value.clone(),
            output_template: request.output_template.clone(),
            task_id: request.task_id(),
        }
    }

    /// Build a `progress(phase=downloading)` event from an engine callback
    ///
    /// `percent` is computed only when both counters are known and the total
    /// is positive; otherwise the field is absent (never `0` or `null`).
    pub fn downloading(progress: &DownloadProgress) -> Self {
        let percent = match (progress.downloaded_bytes, progress.total_bytes) {
            (Some(downloaded), Some(total)) if total > 0 => Some(downloaded as f64 / total as f64),
            _ => None,
        };
        StreamEvent::Progress {
            state: TaskState::Running,
            ts: now_ts(),
            phase: ProgressPhase::Downloading,
            downloaded: progress.downloaded_bytes,
            total: progress.total_bytes,
            percent,
            speed: progress.speed_bps,
            eta: progress.eta_seconds,
            filename: progress.filename.clone(),
        }
    }

    /// Build the final `progress(phase=finished)` event
    pub fn download_finished(filename: Option<String>) -> Self {
        StreamEvent::Progress {
            state: TaskState::Running,
            ts: now_ts(),
            phase: ProgressPhase::Finished,
            downloaded: None,
            total: None,
            percent: None,
            speed: None,
            eta: None,
            filename,
        }
    }

    /// Build a `merging` event carrying a stage description
    pub fn merging(details: impl Into<String>) -> Self {
        StreamEvent::Merging {
            state: TaskState::Merging,
            ts: now_ts(),
            details: details.into(),
        }
    }

    /// Build the terminal `done` event
    pub fn done() -> Self {
        StreamEvent::Done {
            state: TaskState::Done,
            ts: now_ts(),
            ok: true,
        }
    }

    /// Build a terminal `error` event
    pub fn error(error: ErrorRecord) -> Self {
        StreamEvent::Error {
            state: TaskState::Failed,
            ts: now_ts(),
            error,
        }
    }

    /// Build the terminal `cancelled` event
    pub fn cancelled(task_id: Option<&str>) -> Self {
        StreamEvent::Cancelled {
            state: TaskState::Failed,
            ts: now_ts(),
            task_id: task_id.map(String::from),
        }
    }

    /// The wire tag of this event (`start`, `progress`, …)
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Merging { .. } => "merging",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Cancelled { .. } => "cancelled",
        }
    }

    /// The coarse status mirror carried by this event
    pub fn state(&self) -> TaskState {
        match self {
            StreamEvent::Start { state, .. }
            | StreamEvent::Progress { state, .. }
            | StreamEvent::Merging { state, .. }
            | StreamEvent::Done { state, .. }
            | StreamEvent::Error { state, .. }
            | StreamEvent::Cancelled { state, .. } => *state,
        }
    }

    /// Whether this event terminates its task's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Error { .. } | StreamEvent::Cancelled { .. }
        )
    }
}

/// Error produced while parsing a request line
#[derive(Debug, Error)]
pub enum RequestError {
    /// The line was not a valid JSON object
    #[error("{0}")]
    InvalidJson(String),
    /// The command was recognized but its fields did not validate
    #[error("{0}")]
    InvalidFields(String),
}

/// A parsed control-channel request
///
/// The `cmd` tag is matched case-insensitively; unrecognized commands are
/// preserved so the dispatcher can echo them back in the error response.
#[derive(Clone, Debug)]
pub enum ControlRequest {
    /// `{"cmd":"version"}`
    Version,
    /// `{"cmd":"videometa",…}`
    VideoMeta(MetaRequest),
    /// Anything else
    Unknown {
        /// The lowercased command string (empty when `cmd` was absent)
        cmd: String,
    },
}

impl ControlRequest {
    /// Parse one control-channel line
    ///
    /// Validation happens at this transport boundary: by the time a request
    /// reaches a handler its fields are typed.
    pub fn parse(line: &str) -> std::result::Result<Self, RequestError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
        let cmd = value
            .get("cmd")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();
        match cmd.as_str() {
            "version" => Ok(ControlRequest::Version),
            "videometa" => serde_json::from_value(value)
                .map(ControlRequest::VideoMeta)
                .map_err(|e| RequestError::InvalidFields(e.to_string())),
            _ => Ok(ControlRequest::Unknown { cmd }),
        }
    }
}

/// Fields of a `videometa` control request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MetaRequest {
    /// Video page URL (required; its absence is reported as `missing url`)
    #[serde(default)]
    pub url: Option<String>,

    /// Netscape-format cookies file
    #[serde(default)]
    pub cookies: Option<PathBuf>,

    /// Accepted alias for `cookies`
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,

    /// Proxy URL passed through to the engine
    #[serde(default)]
    pub proxy: Option<String>,
}

impl MetaRequest {
    /// The effective cookies file (`cookies` wins over `cookies_path`)
    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.cookies.clone().or_else(|| self.cookies_path.clone())
    }
}

/// A parsed stream-channel request
///
/// The stream channel accepts exactly one command per connection, and only
/// `download` starts a task. The `cmd` tag is matched exactly (no case
/// folding) on this channel.
#[derive(Clone, Debug)]
pub enum StreamRequest {
    /// `{"cmd":"download",…}`
    Download(DownloadRequest),
    /// Anything else (reported as `UNSUPPORTED_CMD`, no task started)
    Unknown {
        /// The command string as given (empty when `cmd` was absent)
        cmd: String,
    },
}

impl StreamRequest {
    /// Parse the single request line of a stream connection
    pub fn parse(line: &str) -> std::result::Result<Self, RequestError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
        let cmd = value
            .get("cmd")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string();
        if cmd == "download" {
            serde_json::from_value(value)
                .map(StreamRequest::Download)
                .map_err(|e| RequestError::InvalidFields(e.to_string()))
        } else {
            Ok(StreamRequest::Unknown { cmd })
        }
    }
}

/// Fields of a `download` stream request
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DownloadRequest {
    /// Caller-supplied opaque task identifier; absent or empty means an
    /// anonymous task that cannot be cancelled by id
    #[serde(default)]
    pub task_id: Option<String>,

    /// Video page URL (an empty URL is passed to the engine, which rejects it)
    #[serde(default)]
    pub url: String,

    /// Format selector forwarded to the engine
    #[serde(default)]
    pub format_value: Option<String>,

    /// Output filename template forwarded to the engine
    #[serde(default)]
    pub output_template: Option<String>,

    /// Netscape-format cookies file
    #[serde(default)]
    pub cookies_path: Option<PathBuf>,

    /// Accepted alias for `cookies_path`
    #[serde(default)]
    pub cookies: Option<PathBuf>,

    /// Proxy URL passed through to the engine
    #[serde(default)]
    pub proxy: Option<String>,
}

impl DownloadRequest {
    /// The task id, normalized so an empty string counts as absent
    pub fn task_id(&self) -> Option<String> {
        self.task_id.clone().filter(|id| !id.is_empty())
    }

    /// The effective cookies file (`cookies_path` wins over `cookies`)
    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.cookies_path.clone().or_else(|| self.cookies.clone())
    }

    /// Lower this request into the engine-facing download description
    pub fn to_spec(&self) -> DownloadSpec {
        DownloadSpec {
            url: self.url.clone(),
            format: self.format_value.clone(),
            output_template: self.output_template.clone(),
            cookie_file: self.cookie_file(),
            proxy: self.proxy.clone(),
        }
    }
}

/// Engine-facing description of one download invocation
#[derive(Clone, Debug)]
pub struct DownloadSpec {
    /// Video page URL
    pub url: String,
    /// Format selector, if any
    pub format: Option<String>,
    /// Output filename template, if any
    pub output_template: Option<String>,
    /// Cookies file, if any
    pub cookie_file: Option<PathBuf>,
    /// Proxy URL, if any
    pub proxy: Option<String>,
}

/// Engine-facing description of a metadata-only query
#[derive(Clone, Debug)]
pub struct MetaQuery {
    /// Video page URL
    pub url: String,
    /// Cookies file, if any
    pub cookie_file: Option<PathBuf>,
    /// Proxy URL, if any
    pub proxy: Option<String>,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    // --- StreamEvent wire shape ---

    #[test]
    fn start_event_serializes_flat_with_event_tag() {
        let request = DownloadRequest {
            task_id: Some("t1".into()),
            url: "https://example.com/v".into(),
            format_value: Some("best".into()),
            output_template: Some("%(title)s.%(ext)s".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(StreamEvent::start(&request)).unwrap();

        assert_eq!(json["event"], "start");
        assert_eq!(json["state"], "running");
        assert_eq!(json["url"], "https://example.com/v");
        assert_eq!(json["format_value"], "best");
        assert_eq!(json["output_template"], "%(title)s.%(ext)s");
        assert_eq!(json["task_id"], "t1");
        assert!(json["ts"].is_f64(), "ts must be a float timestamp");
    }

    #[test]
    fn start_event_omits_absent_optionals() {
        let request = DownloadRequest {
            url: "https://example.com/v".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(StreamEvent::start(&request)).unwrap();

        for field in ["format_value", "output_template", "task_id"] {
            assert!(
                json.get(field).is_none(),
                "{field} must be omitted when not requested"
            );
        }
    }

    #[test]
    fn start_event_treats_empty_task_id_as_absent() {
        let request = DownloadRequest {
            task_id: Some(String::new()),
            url: "https://example.com/v".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(StreamEvent::start(&request)).unwrap();
        assert!(json.get("task_id").is_none());
    }

    #[test]
    fn downloading_event_computes_percent_only_with_positive_total() {
        let progress = DownloadProgress {
            downloaded_bytes: Some(50),
            total_bytes: Some(200),
            ..Default::default()
        };
        let json = serde_json::to_value(StreamEvent::downloading(&progress)).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["phase"], "downloading");
        assert_eq!(json["percent"], 0.25);

        // Unknown total: percent absent, not 0 and not null
        let progress = DownloadProgress {
            downloaded_bytes: Some(50),
            total_bytes: None,
            ..Default::default()
        };
        let json = serde_json::to_value(StreamEvent::downloading(&progress)).unwrap();
        assert!(json.get("percent").is_none());

        // Zero total: same rule
        let progress = DownloadProgress {
            downloaded_bytes: Some(50),
            total_bytes: Some(0),
            ..Default::default()
        };
        let json = serde_json::to_value(StreamEvent::downloading(&progress)).unwrap();
        assert!(json.get("percent").is_none());
        assert_eq!(json["total"], 0);
    }

    #[test]
    fn downloading_event_omits_unreported_numerics() {
        let json =
            serde_json::to_value(StreamEvent::downloading(&DownloadProgress::default())).unwrap();

        for field in ["downloaded", "total", "percent", "speed", "eta", "filename"] {
            assert!(
                json.get(field).is_none(),
                "{field} must be absent when the engine did not report it"
            );
        }
    }

    #[test]
    fn finished_progress_event_has_finished_phase_and_running_state() {
        let json =
            serde_json::to_value(StreamEvent::download_finished(Some("out.mp4".into()))).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["phase"], "finished");
        assert_eq!(json["state"], "running");
        assert_eq!(json["filename"], "out.mp4");
    }

    #[test]
    fn merging_event_carries_details_and_merging_state() {
        let json = serde_json::to_value(StreamEvent::merging("Merger started")).unwrap();
        assert_eq!(json["event"], "merging");
        assert_eq!(json["state"], "merging");
        assert_eq!(json["details"], "Merger started");
    }

    #[test]
    fn done_event_shape() {
        let json = serde_json::to_value(StreamEvent::done()).unwrap();
        assert_eq!(json["event"], "done");
        assert_eq!(json["state"], "done");
        assert_eq!(json["ok"], true);
    }

    #[test]
    fn error_event_carries_classified_record() {
        let record = ErrorRecord::new(ErrorCode::Http403, "HTTP Error 403: Forbidden");
        let json = serde_json::to_value(StreamEvent::error(record)).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"]["code"], "HTTP_403");
        assert_eq!(json["error"]["message"], "HTTP Error 403: Forbidden");
    }

    #[test]
    fn cancelled_event_is_failed_state_but_distinct_tag() {
        let json = serde_json::to_value(StreamEvent::cancelled(Some("t9"))).unwrap();
        assert_eq!(json["event"], "cancelled");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["task_id"], "t9");
        assert!(
            json.get("error").is_none(),
            "cancellation is not an error and must carry no error record"
        );
    }

    #[test]
    fn terminal_classification_matches_contract() {
        assert!(StreamEvent::done().is_terminal());
        assert!(
            StreamEvent::error(ErrorRecord::new(ErrorCode::Unknown, "boom")).is_terminal()
        );
        assert!(StreamEvent::cancelled(None).is_terminal());
        assert!(!StreamEvent::merging("x").is_terminal());
        assert!(!StreamEvent::download_finished(None).is_terminal());
    }

    // --- ControlRequest parsing ---

    #[test]
    fn control_parse_version() {
        assert!(matches!(
            ControlRequest::parse(r#"{"cmd":"version"}"#).unwrap(),
            ControlRequest::Version
        ));
    }

    #[test]
    fn control_parse_is_case_insensitive() {
        assert!(matches!(
            ControlRequest::parse(r#"{"cmd":"VERSION"}"#).unwrap(),
            ControlRequest::Version
        ));
        assert!(matches!(
            ControlRequest::parse(r#"{"cmd":"VideoMeta","url":"u"}"#).unwrap(),
            ControlRequest::VideoMeta(_)
        ));
    }

    #[test]
    fn control_parse_videometa_fields() {
        let parsed = ControlRequest::parse(
            r#"{"cmd":"videometa","url":"https://x/v","cookies":"/tmp/c.txt","proxy":"http://p:8080"}"#,
        )
        .unwrap();
        match parsed {
            ControlRequest::VideoMeta(meta) => {
                assert_eq!(meta.url.as_deref(), Some("https://x/v"));
                assert_eq!(meta.cookie_file(), Some(PathBuf::from("/tmp/c.txt")));
                assert_eq!(meta.proxy.as_deref(), Some("http://p:8080"));
            }
            other => panic!("expected VideoMeta, got {other:?}"),
        }
    }

    #[test]
    fn control_parse_videometa_accepts_cookies_path_alias() {
        let parsed =
            ControlRequest::parse(r#"{"cmd":"videometa","url":"u","cookies_path":"/tmp/c.txt"}"#)
                .unwrap();
        match parsed {
            ControlRequest::VideoMeta(meta) => {
                assert_eq!(meta.cookie_file(), Some(PathBuf::from("/tmp/c.txt")));
            }
            other => panic!("expected VideoMeta, got {other:?}"),
        }
    }

    #[test]
    fn control_parse_videometa_prefers_cookies_over_alias() {
        let parsed = ControlRequest::parse(
            r#"{"cmd":"videometa","url":"u","cookies":"/a","cookies_path":"/b"}"#,
        )
        .unwrap();
        match parsed {
            ControlRequest::VideoMeta(meta) => {
                assert_eq!(meta.cookie_file(), Some(PathBuf::from("/a")));
            }
            other => panic!("expected VideoMeta, got {other:?}"),
        }
    }

    #[test]
    fn control_parse_unknown_preserves_cmd() {
        match ControlRequest::parse(r#"{"cmd":"probe"}"#).unwrap() {
            ControlRequest::Unknown { cmd } => assert_eq!(cmd, "probe"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn control_parse_missing_cmd_is_unknown_empty() {
        match ControlRequest::parse(r#"{"url":"u"}"#).unwrap() {
            ControlRequest::Unknown { cmd } => assert_eq!(cmd, ""),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn control_parse_rejects_malformed_json() {
        assert!(ControlRequest::parse("{not json").is_err());
        assert!(ControlRequest::parse("").is_err());
    }

    // --- StreamRequest parsing ---

    #[test]
    fn stream_parse_download_fields() {
        let parsed = StreamRequest::parse(
            r#"{"cmd":"download","task_id":"t1","url":"https://x/v","format_value":"best","output_template":"o.%(ext)s","cookies_path":"/tmp/c"}"#,
        )
        .unwrap();
        match parsed {
            StreamRequest::Download(req) => {
                assert_eq!(req.task_id(), Some("t1".to_string()));
                assert_eq!(req.url, "https://x/v");
                let spec = req.to_spec();
                assert_eq!(spec.format.as_deref(), Some("best"));
                assert_eq!(spec.output_template.as_deref(), Some("o.%(ext)s"));
                assert_eq!(spec.cookie_file, Some(PathBuf::from("/tmp/c")));
            }
            other => panic!("expected Download, got {other:?}"),
        }
    }

    #[test]
    fn stream_parse_download_cookies_path_wins_over_cookies() {
        let parsed = StreamRequest::parse(
            r#"{"cmd":"download","url":"u","cookies_path":"/a","cookies":"/b"}"#,
        )
        .unwrap();
        match parsed {
            StreamRequest::Download(req) => {
                assert_eq!(req.cookie_file(), Some(PathBuf::from("/a")));
            }
            other => panic!("expected Download, got {other:?}"),
        }
    }

    #[test]
    fn stream_parse_cmd_match_is_exact() {
        // The stream channel does not case-fold: "Download" is unsupported.
        match StreamRequest::parse(r#"{"cmd":"Download","url":"u"}"#).unwrap() {
            StreamRequest::Unknown { cmd } => assert_eq!(cmd, "Download"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn stream_parse_missing_url_defaults_to_empty() {
        match StreamRequest::parse(r#"{"cmd":"download"}"#).unwrap() {
            StreamRequest::Download(req) => assert_eq!(req.url, ""),
            other => panic!("expected Download, got {other:?}"),
        }
    }

    #[test]
    fn stream_parse_rejects_malformed_json() {
        assert!(StreamRequest::parse("\u{1}garbage").is_err());
    }
}
