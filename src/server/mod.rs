//! TCP servers exposing the bridge protocol
//!
//! Three listeners share one [`Bridge`]:
//! - the **control** server answers short request/response metadata queries,
//! - the **stream** server runs one download task per connection and pushes
//!   its NDJSON event lifecycle,
//! - the optional **legacy** server speaks the historical single-port
//!   protocol for older clients.
//!
//! Each accepted connection gets its own spawned task. The only state
//! shared between connections is the [`TaskRegistry`].

mod control;
mod legacy;
mod stream;

pub use legacy::port_in_use;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::engine::{DownloadEngine, YtDlpEngine};
use crate::error::Result;
use crate::registry::TaskRegistry;

/// The bridge control plane: engine, registry, and server configuration
///
/// Cloning is cheap (all fields are shared); every clone operates on the
/// same registry and engine. The registry is deliberately reachable from
/// the outside through [`registry`](Bridge::registry): cancellation
/// originates from the embedding application, not from the wire.
#[derive(Clone)]
pub struct Bridge {
    engine: Arc<dyn DownloadEngine>,
    registry: TaskRegistry,
    config: Arc<Config>,
}

impl Bridge {
    /// Create a bridge driving the external yt-dlp binary
    ///
    /// Binary resolution follows the configuration: an explicit
    /// `engine.binary_path` wins, otherwise PATH is searched (unless
    /// disabled). Construction never fails when the binary is missing;
    /// engine calls fail at invocation time and `version` degrades to
    /// `"unknown"`.
    pub fn new(config: Config) -> Self {
        let engine: Arc<dyn DownloadEngine> = match &config.engine.binary_path {
            Some(path) => Arc::new(YtDlpEngine::new(path.clone())),
            None if config.engine.search_path => match YtDlpEngine::from_path() {
                Some(engine) => Arc::new(engine),
                None => {
                    tracing::warn!(
                        "yt-dlp not found in PATH; engine calls will fail until it is installed"
                    );
                    Arc::new(YtDlpEngine::new(PathBuf::from("yt-dlp")))
                }
            },
            None => Arc::new(YtDlpEngine::new(PathBuf::from("yt-dlp"))),
        };
        tracing::info!(engine = engine.name(), "download engine initialized");
        Self::with_engine(config, engine)
    }

    /// Create a bridge with a custom engine implementation
    ///
    /// This is the seam tests use to run a scripted engine with no network
    /// access, and embedders use to swap in a different backend.
    pub fn with_engine(config: Config, engine: Arc<dyn DownloadEngine>) -> Self {
        Self {
            engine,
            registry: TaskRegistry::new(),
            config: Arc::new(config),
        }
    }

    /// The shared task registry
    ///
    /// Cancellation requests go through this handle:
    /// `bridge.registry().request_cancel("task-1")`.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The download engine
    pub fn engine(&self) -> &Arc<dyn DownloadEngine> {
        &self.engine
    }

    /// The server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind all configured listeners and serve until the process stops
    ///
    /// The legacy listener is bound only when configured, and skipped
    /// cleanly (not an error) when another instance is already accepting
    /// connections on its port.
    pub async fn serve(&self) -> Result<()> {
        let control = TcpListener::bind(self.config.control.addr()).await?;
        let control_addr = control.local_addr()?;
        tracing::info!(addr = %control_addr, "control server listening");

        let stream = TcpListener::bind(self.config.stream.addr()).await?;
        let stream_addr = stream.local_addr()?;
        tracing::info!(addr = %stream_addr, "stream server listening");

        let legacy = match self.config.legacy.addr() {
            Some(addr) => {
                if legacy::port_in_use(&addr).await {
                    tracing::info!(
                        %addr,
                        "another instance already serves the legacy port, skipping"
                    );
                    None
                } else {
                    let listener = TcpListener::bind(&addr).await?;
                    let legacy_addr = listener.local_addr()?;
                    tracing::info!(addr = %legacy_addr, "legacy server listening");
                    Some(listener)
                }
            }
            None => None,
        };

        tokio::try_join!(self.serve_control(control), self.serve_stream(stream), async {
            match legacy {
                Some(listener) => self.serve_legacy(listener).await,
                None => Ok(()),
            }
        })?;
        Ok(())
    }

    /// Serve the control protocol on an already-bound listener
    ///
    /// Useful for tests and embedders that bind to port 0 themselves.
    pub async fn serve_control(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    tracing::debug!(%peer, "control connection accepted");
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = control::handle_connection(bridge, socket).await {
                            tracing::debug!(error = %e, "control connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    // Transient accept failures (e.g. fd exhaustion) must not
                    // take the server down.
                    tracing::warn!(error = %e, "failed to accept control connection");
                }
            }
        }
    }

    /// Serve the stream protocol on an already-bound listener
    pub async fn serve_stream(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    tracing::debug!(%peer, "stream connection accepted");
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = stream::handle_connection(bridge, socket).await {
                            tracing::debug!(error = %e, "stream connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept stream connection");
                }
            }
        }
    }

    /// Serve the legacy single-port protocol on an already-bound listener
    pub async fn serve_legacy(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    tracing::debug!(%peer, "legacy connection accepted");
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = legacy::handle_connection(bridge, socket).await {
                            tracing::debug!(error = %e, "legacy connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept legacy connection");
                }
            }
        }
    }
}

/// Write one compact JSON line and flush it
pub(crate) async fn write_json_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &serde_json::Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
