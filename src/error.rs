//! Error types for ydl-bridge
//!
//! This module provides error handling for the crate, including:
//! - Domain-specific error types (engine invocation, configuration, I/O)
//! - The stable wire-level error code vocabulary consumed by clients
//! - The best-effort classifier that maps free-text engine failures to codes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for ydl-bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ydl-bridge
///
/// This is the primary error type used throughout the crate. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "YDL_CONTROL_PORT")
        key: Option<String>,
    },

    /// Download engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors produced by a [`DownloadEngine`](crate::engine::DownloadEngine) invocation
///
/// The stream dispatcher pattern-matches on these variants to decide which
/// terminal event a task gets: `Download` failures are run through
/// [`classify`], `Aborted` maps to the `cancelled` event, and everything else
/// becomes an `UNKNOWN` error event.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine reported a download failure (free-text message, classifiable)
    #[error("{0}")]
    Download(String),

    /// The invocation was aborted by a cancellation signal from a progress hook
    #[error("download aborted by cancellation")]
    Aborted,

    /// External tool execution failed (binary missing, spawn failure, etc.)
    #[error("external tool error: {0}")]
    Tool(String),

    /// The engine produced output this adapter could not use
    #[error("unusable engine output: {0}")]
    Output(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Stable wire-level error codes consumed by the client
///
/// These are part of the protocol contract: clients switch on the code, not
/// the message. The serialized form is the SCREAMING_SNAKE string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed input line (invalid UTF-8 or JSON)
    #[serde(rename = "BAD_REQUEST")]
    BadRequest,
    /// Unknown or out-of-place command
    #[serde(rename = "UNSUPPORTED_CMD")]
    UnsupportedCmd,
    /// Engine failure that looks like an HTTP 401
    #[serde(rename = "HTTP_401")]
    Http401,
    /// Engine failure that looks like an HTTP 403 / forbidden response
    #[serde(rename = "HTTP_403")]
    Http403,
    /// Engine failure that looks like a geo restriction
    #[serde(rename = "GEO_BLOCKED")]
    GeoBlocked,
    /// Engine failure attributed to ffmpeg post-processing
    #[serde(rename = "FFMPEG_ERROR")]
    FfmpegError,
    /// Any other engine-reported download failure
    #[serde(rename = "DOWNLOAD_ERROR")]
    DownloadError,
    /// Unanticipated failure; the message carries diagnostic detail
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ErrorCode {
    /// The wire string for this code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedCmd => "UNSUPPORTED_CMD",
            ErrorCode::Http401 => "HTTP_401",
            ErrorCode::Http403 => "HTTP_403",
            ErrorCode::GeoBlocked => "GEO_BLOCKED",
            ErrorCode::FfmpegError => "FFMPEG_ERROR",
            ErrorCode::DownloadError => "DOWNLOAD_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error record carried by `error` events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional remediation hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorRecord {
    /// Create a new error record with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a remediation hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Classify a free-text engine error message into a stable [`ErrorCode`]
///
/// Case-insensitive substring matching, first match wins. This is
/// deliberately lossy and heuristic: engine messages are unstructured and
/// vary across sites and engine versions, so the result is best-effort, not
/// authoritative. Anything unrecognized falls back to
/// [`ErrorCode::DownloadError`].
pub fn classify(message: &str) -> ErrorCode {
    let m = message.to_lowercase();
    if m.contains("http error 401") {
        ErrorCode::Http401
    } else if m.contains("http error 403") || m.contains("forbidden") {
        ErrorCode::Http403
    } else if m.contains("geo") && m.contains("restrict") {
        ErrorCode::GeoBlocked
    } else if m.contains("ffmpeg") {
        ErrorCode::FfmpegError
    } else {
        ErrorCode::DownloadError
    }
}
