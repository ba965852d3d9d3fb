//! Server binary: parse flags, initialize logging, serve until signalled

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ydl_bridge::{Bridge, Config, Result, run_with_shutdown};

/// Local TCP control plane for a yt-dlp style download engine
#[derive(Debug, Parser)]
#[command(name = "ydl-bridge", disable_version_flag = true)]
struct Cli {
    /// Path to a TOML configuration file (YDL_* env vars override it)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print bridge and engine versions, then exit
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_file(path)?,
        None => Config::default(),
    }
    .overridden_from_env()?;

    let bridge = Bridge::new(config);

    if cli.version {
        println!("ydl-bridge {}", env!("CARGO_PKG_VERSION"));
        let engine_version = bridge
            .engine()
            .version()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        println!("yt-dlp version: {engine_version}");
        return Ok(());
    }

    run_with_shutdown(bridge).await
}
