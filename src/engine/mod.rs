//! Download engine interface and adapters
//!
//! The bridge never implements extraction, format selection, or fetching
//! itself; it drives an external engine through [`DownloadEngine`] and
//! receives the engine's callbacks through [`ProgressSink`]. Keeping both
//! sides behind traits makes the engine swappable and lets tests run a
//! scripted engine with no network access.

mod ytdlp;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use ytdlp::YtDlpEngine;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{DownloadSpec, MetaQuery};

/// What a progress hook tells the engine to do next
///
/// This is the checked cancellation signal: instead of unwinding out of the
/// engine's call stack, a hook returns [`HookAction::Abort`] and the engine
/// stops work and releases whatever partial output it controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookAction {
    /// Keep going
    Continue,
    /// Stop the invocation; the engine must treat this as fatal
    Abort,
}

/// Status of a download progress callback
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProgressStatus {
    /// Bytes are being fetched
    #[default]
    Downloading,
    /// The fetch completed; post-processing is about to begin
    Finished,
}

/// One download progress callback payload
///
/// Every numeric field is optional: values the engine did not report, or
/// reported in a form that does not coerce to a number, stay `None` rather
/// than defaulting to zero.
#[derive(Clone, Debug, Default)]
pub struct DownloadProgress {
    /// Callback status
    pub status: ProgressStatus,
    /// Bytes downloaded so far
    pub downloaded_bytes: Option<u64>,
    /// Total bytes, exact or estimated
    pub total_bytes: Option<u64>,
    /// Current speed in bytes per second
    pub speed_bps: Option<f64>,
    /// Estimated seconds to completion
    pub eta_seconds: Option<u64>,
    /// Target filename
    pub filename: Option<String>,
}

/// Status of a post-processing callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostprocessStatus {
    /// The stage started
    Started,
    /// The stage finished
    Finished,
}

/// One post-processing callback payload
#[derive(Clone, Debug)]
pub struct PostprocessUpdate {
    /// Callback status
    pub status: PostprocessStatus,
    /// Name of the post-processing stage (e.g. `Merger`, `FixupM4a`)
    pub processor: String,
}

/// Capability interface the engine calls back into during a download
///
/// Implemented by the stream dispatcher's adapter, which forwards callbacks
/// as wire events and polls the cancellation flag. Hooks are invoked from
/// the engine's own blocking invocation, strictly in callback order.
#[async_trait]
pub trait ProgressSink: Send {
    /// Called for every download progress notification
    async fn on_progress(&mut self, progress: DownloadProgress) -> HookAction;

    /// Called for every post-processing stage notification
    async fn on_postprocess(&mut self, update: PostprocessUpdate) -> HookAction;
}

/// An external video-extraction/download capability
///
/// The bridge adapts implementations of this trait onto the wire protocol.
/// Invocations block their caller for the task's entire duration; progress
/// is pushed synchronously through the sink as the engine reports it. No
/// timeouts are imposed here: a hung engine call hangs the owning
/// connection, a documented limitation.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// The engine's version string
    ///
    /// # Errors
    ///
    /// Returns an error when the engine is unreachable (e.g. the external
    /// binary is missing). The control dispatcher maps that to `"unknown"`.
    async fn version(&self) -> EngineResult<String>;

    /// Extract metadata only, with no download
    ///
    /// Runs with playlist expansion disabled, certificate validation
    /// relaxed, and quiet/no-warning output. The returned object is the
    /// engine's metadata JSON, passed through to the client verbatim.
    async fn fetch_metadata(&self, query: &MetaQuery) -> EngineResult<serde_json::Value>;

    /// Run one download, reporting progress through `sink`
    ///
    /// # Errors
    ///
    /// - [`EngineError::Download`] for engine-reported failures (the message
    ///   is classified into a wire error code)
    /// - [`EngineError::Aborted`] when a hook returned [`HookAction::Abort`]
    /// - [`EngineError::Tool`] / [`EngineError::Output`] for adapter-level
    ///   failures, surfaced as `UNKNOWN`
    ///
    /// [`EngineError::Download`]: crate::error::EngineError::Download
    /// [`EngineError::Aborted`]: crate::error::EngineError::Aborted
    /// [`EngineError::Tool`]: crate::error::EngineError::Tool
    /// [`EngineError::Output`]: crate::error::EngineError::Output
    async fn download(
        &self,
        spec: &DownloadSpec,
        sink: &mut (dyn ProgressSink + Send),
    ) -> EngineResult<()>;

    /// Human-readable adapter name for logging
    fn name(&self) -> &'static str;
}
