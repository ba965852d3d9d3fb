//! Scripted in-process engine for unit tests
//!
//! Plays back a fixed sequence of callbacks and finishes with a scripted
//! outcome, so dispatcher behavior can be tested without a network or an
//! external binary.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    DownloadEngine, DownloadProgress, HookAction, PostprocessUpdate, ProgressSink, ProgressStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::types::{DownloadSpec, MetaQuery};

/// One scripted engine callback
#[derive(Clone, Debug)]
pub(crate) enum ScriptStep {
    Progress(DownloadProgress),
    Postprocess(PostprocessUpdate),
}

/// How a scripted download ends (after all steps ran)
#[derive(Clone, Debug)]
pub(crate) enum ScriptOutcome {
    Success,
    Download(String),
    Tool(String),
}

/// Deterministic [`DownloadEngine`] playing back a prepared script
pub(crate) struct ScriptEngine {
    pub(crate) version: Option<String>,
    pub(crate) metadata: Result<Value, String>,
    pub(crate) steps: Vec<ScriptStep>,
    pub(crate) outcome: ScriptOutcome,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self {
            version: Some("2025.01.01-test".into()),
            metadata: Ok(serde_json::json!({"id": "stub", "title": "Stub Video"})),
            steps: Vec::new(),
            outcome: ScriptOutcome::Success,
        }
    }
}

impl ScriptEngine {
    /// A download progress step with the given byte counters
    pub(crate) fn downloading(downloaded: u64, total: Option<u64>) -> ScriptStep {
        ScriptStep::Progress(DownloadProgress {
            status: ProgressStatus::Downloading,
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            speed_bps: Some(1024.0),
            eta_seconds: Some(3),
            filename: Some("out.mp4".into()),
        })
    }

    /// The final `finished` progress step
    pub(crate) fn finished() -> ScriptStep {
        ScriptStep::Progress(DownloadProgress {
            status: ProgressStatus::Finished,
            filename: Some("out.mp4".into()),
            ..DownloadProgress::default()
        })
    }
}

#[async_trait]
impl DownloadEngine for ScriptEngine {
    async fn version(&self) -> EngineResult<String> {
        self.version
            .clone()
            .ok_or_else(|| EngineError::Tool("engine unreachable".into()))
    }

    async fn fetch_metadata(&self, _query: &MetaQuery) -> EngineResult<Value> {
        self.metadata
            .clone()
            .map_err(EngineError::Download)
    }

    async fn download(
        &self,
        _spec: &DownloadSpec,
        sink: &mut (dyn ProgressSink + Send),
    ) -> EngineResult<()> {
        for step in &self.steps {
            let action = match step {
                ScriptStep::Progress(progress) => sink.on_progress(progress.clone()).await,
                ScriptStep::Postprocess(update) => sink.on_postprocess(update.clone()).await,
            };
            if action == HookAction::Abort {
                return Err(EngineError::Aborted);
            }
        }
        match &self.outcome {
            ScriptOutcome::Success => Ok(()),
            ScriptOutcome::Download(message) => Err(EngineError::Download(message.clone())),
            ScriptOutcome::Tool(message) => Err(EngineError::Tool(message.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "script"
    }
}
