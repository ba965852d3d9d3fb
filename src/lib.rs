//! # ydl-bridge
//!
//! Local TCP control plane that lets a desktop application drive a
//! yt-dlp style video download engine without linking it directly.
//!
//! Two servers expose distinct responsibilities:
//! - a **control** server (default `127.0.0.1:54320`) for short
//!   request/response metadata queries (`version`, `videometa`),
//! - a **stream** server (default `127.0.0.1:54321`) for long-running
//!   download tasks that push an ordered NDJSON event lifecycle
//!   (`start` → `progress`/`merging` → `done`/`error`/`cancelled`) and
//!   support mid-flight cancellation through a shared task registry.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - the binary is a thin bootstrap; everything is
//!   embeddable and testable in-process
//! - **Engine behind a trait** - extraction, fetching and muxing live in
//!   the external engine; the bridge only adapts its callbacks onto the
//!   wire, so the engine is swappable and mockable
//! - **One synchronized resource** - the task registry is the only state
//!   shared between connections
//! - **Bit-stable protocol** - event order, terminal uniqueness, and
//!   absent-not-null optional fields are contracts the client relies on
//!
//! ## Quick Start
//!
//! ```no_run
//! use ydl_bridge::{Bridge, Config, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let bridge = Bridge::new(config);
//!
//!     // The registry handle is how an embedder cancels tasks:
//!     let registry = bridge.registry().clone();
//!     let _ = registry; // e.g. registry.request_cancel("task-1")
//!
//!     run_with_shutdown(bridge).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Download engine interface and adapters
pub mod engine;
/// Error types and the wire error-code classifier
pub mod error;
/// NDJSON event writing
pub mod events;
/// Task registry with cooperative cancellation flags
pub mod registry;
/// TCP servers (control, stream, legacy)
pub mod server;
/// Core protocol types
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use engine::{
    DownloadEngine, DownloadProgress, HookAction, PostprocessStatus, PostprocessUpdate,
    ProgressSink, ProgressStatus, YtDlpEngine,
};
pub use error::{
    EngineError, EngineResult, Error, ErrorCode, ErrorRecord, Result, classify,
};
pub use events::EventWriter;
pub use registry::{RegistrationGuard, TaskRegistry};
pub use server::{Bridge, port_in_use};
pub use types::{
    ControlRequest, DownloadRequest, DownloadSpec, MetaQuery, MetaRequest, ProgressPhase,
    StreamEvent, StreamRequest, TaskState,
};

/// Helper function to run the bridge with graceful signal handling.
///
/// Serves until a termination signal arrives, then returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use ydl_bridge::{Bridge, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bridge = Bridge::new(Config::default());
///     run_with_shutdown(bridge).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(bridge: Bridge) -> Result<()> {
    tokio::select! {
        result = bridge.serve() => result,
        _ = wait_for_signal() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
