//! Configuration types for ydl-bridge
//!
//! Defaults work out of the box (both servers on localhost, engine found on
//! PATH). Every address is independently overridable through environment
//! variables, and the whole structure can be loaded from a TOML file; env
//! overrides are applied on top of whatever was loaded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the control server host
pub const ENV_CONTROL_HOST: &str = "YDL_CONTROL_HOST";
/// Environment variable overriding the control server port
pub const ENV_CONTROL_PORT: &str = "YDL_CONTROL_PORT";
/// Environment variable overriding the stream server host
pub const ENV_STREAM_HOST: &str = "YDL_STREAM_HOST";
/// Environment variable overriding the stream server port
pub const ENV_STREAM_PORT: &str = "YDL_STREAM_PORT";
/// Environment variable enabling the legacy single-port server
pub const ENV_LEGACY_PORT: &str = "YDL_LEGACY_PORT";
/// Environment variable overriding the engine binary path
pub const ENV_ENGINE_BIN: &str = "YDL_BIN";

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    54320
}

fn default_stream_port() -> u16 {
    54321
}

fn default_true() -> bool {
    true
}

/// Control server bind address (default: `127.0.0.1:54320`)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Host to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_control_port")]
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_control_port(),
        }
    }
}

impl ControlConfig {
    /// The bind address as a `host:port` string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Stream server bind address (default: `127.0.0.1:54321`)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Host to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_stream_port")]
    pub port: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_stream_port(),
        }
    }
}

impl StreamConfig {
    /// The bind address as a `host:port` string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Legacy single-port server (disabled unless a port is configured)
///
/// A historical protocol variant kept for older clients: control-style
/// `version`/`json` commands on one port, guarded against double binding by
/// probing whether the port already accepts connections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Host to bind (defaults to localhost when a port is set)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind; `None` disables the legacy server
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

impl LegacyConfig {
    /// The bind address as a `host:port` string, when enabled
    pub fn addr(&self) -> Option<String> {
        self.port.map(|port| format!("{}:{}", self.host, port))
    }
}

/// Download engine binary configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Whether to search PATH for the binary if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            search_path: true,
        }
    }
}

/// Main configuration for the bridge
///
/// All sub-configs default sensibly; a TOML file may specify any subset:
///
/// ```toml
/// [control]
/// port = 54320
///
/// [stream]
/// port = 54321
///
/// [engine]
/// binary_path = "/usr/local/bin/yt-dlp"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control server settings
    #[serde(default)]
    pub control: ControlConfig,

    /// Stream server settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Legacy single-port server settings
    #[serde(default)]
    pub legacy: LegacyConfig,

    /// Download engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().overridden_from_env()
    }

    /// Load configuration from a TOML file (env overrides NOT applied)
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {e}", path.display()),
            key: None,
        })?;
        toml::from_str(&text).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {e}", path.display()),
            key: None,
        })
    }

    /// Apply `YDL_*` environment overrides on top of this configuration
    pub fn overridden_from_env(mut self) -> Result<Self> {
        if let Ok(host) = std::env::var(ENV_CONTROL_HOST) {
            self.control.host = host;
        }
        if let Some(port) = env_port(ENV_CONTROL_PORT)? {
            self.control.port = port;
        }
        if let Ok(host) = std::env::var(ENV_STREAM_HOST) {
            self.stream.host = host;
        }
        if let Some(port) = env_port(ENV_STREAM_PORT)? {
            self.stream.port = port;
        }
        if let Some(port) = env_port(ENV_LEGACY_PORT)? {
            self.legacy.port = Some(port);
        }
        if let Ok(bin) = std::env::var(ENV_ENGINE_BIN) {
            self.engine.binary_path = Some(PathBuf::from(bin));
        }
        Ok(self)
    }
}

/// Read an optional port number from the environment
fn env_port(key: &str) -> Result<Option<u16>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| Error::Config {
                message: format!("invalid port number: {value:?}"),
                key: Some(key.to_string()),
            }),
        Err(_) => Ok(None),
    }
}
