//! Common test utilities for ydl-bridge E2E tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use ydl_bridge::error::{EngineError, EngineResult};
use ydl_bridge::{
    DownloadEngine, DownloadProgress, DownloadSpec, HookAction, MetaQuery, PostprocessStatus,
    PostprocessUpdate, ProgressSink, ProgressStatus,
};

/// One scripted engine callback
#[derive(Clone)]
#[allow(dead_code)]
pub enum MockStep {
    /// Forward a download progress callback
    Progress(DownloadProgress),
    /// Forward a post-processing callback
    Postprocess(PostprocessUpdate),
    /// Park until the test calls `notify_one` on this handle
    Hold(Arc<Notify>),
}

/// How a scripted download ends once all steps ran
#[derive(Clone)]
#[allow(dead_code)]
pub enum MockOutcome {
    Success,
    Fail(String),
}

/// Deterministic in-process engine for end-to-end tests
///
/// Scripts are selected by request URL so concurrent connections can run
/// different lifecycles against one shared engine.
pub struct MockEngine {
    pub version: Option<String>,
    pub metadata: Result<Value, String>,
    pub scripts: HashMap<String, Vec<MockStep>>,
    pub default_steps: Vec<MockStep>,
    pub outcome: MockOutcome,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            version: Some("2025.01.01-mock".into()),
            metadata: Ok(serde_json::json!({"id": "mock", "title": "Mock Video"})),
            scripts: HashMap::new(),
            default_steps: Vec::new(),
            outcome: MockOutcome::Success,
        }
    }
}

#[allow(dead_code)]
impl MockEngine {
    pub fn downloading(downloaded: u64, total: Option<u64>) -> MockStep {
        MockStep::Progress(DownloadProgress {
            status: ProgressStatus::Downloading,
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            speed_bps: Some(2048.0),
            eta_seconds: Some(5),
            filename: Some("out.mp4".into()),
        })
    }

    pub fn finished() -> MockStep {
        MockStep::Progress(DownloadProgress {
            status: ProgressStatus::Finished,
            filename: Some("out.mp4".into()),
            ..DownloadProgress::default()
        })
    }

    pub fn postprocess(status: PostprocessStatus, processor: &str) -> MockStep {
        MockStep::Postprocess(PostprocessUpdate {
            status,
            processor: processor.into(),
        })
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn version(&self) -> EngineResult<String> {
        self.version
            .clone()
            .ok_or_else(|| EngineError::Tool("engine unreachable".into()))
    }

    async fn fetch_metadata(&self, _query: &MetaQuery) -> EngineResult<Value> {
        self.metadata.clone().map_err(EngineError::Download)
    }

    async fn download(
        &self,
        spec: &DownloadSpec,
        sink: &mut (dyn ProgressSink + Send),
    ) -> EngineResult<()> {
        let steps = self.scripts.get(&spec.url).unwrap_or(&self.default_steps);
        for step in steps {
            let action = match step {
                MockStep::Progress(progress) => sink.on_progress(progress.clone()).await,
                MockStep::Postprocess(update) => sink.on_postprocess(update.clone()).await,
                MockStep::Hold(gate) => {
                    gate.notified().await;
                    continue;
                }
            };
            if action == HookAction::Abort {
                return Err(EngineError::Aborted);
            }
        }
        match &self.outcome {
            MockOutcome::Success => Ok(()),
            MockOutcome::Fail(message) => Err(EngineError::Download(message.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Assert the stream invariant: one `start` first, exactly one terminal
/// event, and nothing after the terminal.
#[allow(dead_code)]
pub fn assert_well_formed_stream(events: &[Value]) {
    assert!(
        !events.is_empty(),
        "a started task must emit at least start + terminal"
    );
    assert_eq!(events[0]["event"], "start", "first event must be start");

    let terminal_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            matches!(
                e["event"].as_str(),
                Some("done") | Some("error") | Some("cancelled")
            )
        })
        .map(|(i, _)| i)
        .collect();
    assert_eq!(
        terminal_positions.len(),
        1,
        "exactly one terminal event per task, got {events:#?}"
    );
    assert_eq!(
        terminal_positions[0],
        events.len() - 1,
        "no event may follow the terminal one, got {events:#?}"
    );
}
