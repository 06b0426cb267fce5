//! Frame Dispatch Harness
//!
//! Drives one or more simulated camera loops through the inference
//! dispatcher and reports how every frame was served.
//!
//! # Usage
//!
//! ```bash
//! # Four cameras at 5 fps for 30 seconds
//! frame-dispatch --frame frame.b64 --cameras 4 --fps 5 --duration-secs 30
//!
//! # Against a specific host
//! frame-dispatch --frame frame.b64 \
//!     --ws-url ws://detector:8000/ws/inference \
//!     --http-url http://detector:8000/api/inference
//!
//! # Only check that the fallback service answers
//! frame-dispatch --health-check
//! ```
//!
//! # Environment Variables
//!
//! - `DISPATCH_CONFIG`: Path to the TOML configuration file
//! - `DISPATCH_WS_URL`, `DISPATCH_HTTP_URL`: Service endpoints
//! - `DISPATCH_RESPONSE_TIMEOUT_MS`, `DISPATCH_MIN_INTERVAL_MS`: Timing overrides
//! - `RUST_LOG`: Log filter (default: `info` for the dispatch crates)
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): Stop the cameras, cancel in-flight frames, print stats

mod frame;
mod producer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dispatch_core::{
    load_config_from_path, ConfigOverrides, Dispatcher, DispatcherConfig, FallbackTransport,
};

use crate::producer::{run_camera, CameraFeed};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "frame-dispatch", version)]
#[command(about = "Replay camera frames through the inference dispatcher")]
struct Cli {
    /// Configuration file (default: the user config directory)
    #[arg(long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Persistent channel URL
    #[arg(long)]
    ws_url: Option<String>,

    /// Fallback inference URL
    #[arg(long)]
    http_url: Option<String>,

    /// File holding the encoded frame (base64 or data URL)
    #[arg(long, required_unless_present = "health_check")]
    frame: Option<PathBuf>,

    /// Model reference sent with every frame
    #[arg(long, default_value = "models/yolov8n.pt")]
    model: String,

    /// Confidence threshold
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    /// Number of simulated cameras
    #[arg(long, default_value_t = 1)]
    cameras: usize,

    /// Frames per second per camera
    #[arg(long, default_value_t = 2.0)]
    fps: f64,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Check the fallback service and exit
    #[arg(long)]
    health_check: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.ws_url {
            overrides = overrides.with_ws_url(url.clone());
        }
        if let Some(ref url) = self.http_url {
            overrides = overrides.with_http_url(url.clone());
        }
        overrides
    }

    fn frame_period(&self) -> anyhow::Result<Duration> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            bail!("--fps must be a positive number, got {}", self.fps);
        }
        Ok(Duration::from_secs_f64(1.0 / self.fps))
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<DispatcherConfig> {
    let mut config =
        load_config_from_path(cli.config.clone()).context("failed to load configuration")?;
    cli.overrides().apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("frame_dispatch=info".parse()?)
                .add_directive("dispatch_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    info!(
        source = %config.source(),
        ws_url = %config.connection.url,
        http_url = %config.fallback.url,
        "configuration loaded"
    );

    if cli.health_check {
        let fallback = FallbackTransport::new(config.fallback.clone());
        if fallback.health_check().await {
            info!(url = %fallback.url(), "fallback service healthy");
            return Ok(());
        }
        bail!("fallback service at {} is not healthy", fallback.url());
    }

    let period = cli.frame_period()?;
    let Some(ref frame_path) = cli.frame else {
        bail!("--frame is required");
    };
    let frame: Arc<str> = frame::load_frame(frame_path).await?.into();

    let dispatcher = Arc::new(Dispatcher::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cameras: Vec<_> = (1..=cli.cameras.max(1))
        .map(|n| {
            let feed = CameraFeed {
                source_id: format!("cam-{n}"),
                model_path: cli.model.clone(),
                threshold: cli.threshold,
                frame: Arc::clone(&frame),
                period,
            };
            tokio::spawn(run_camera(
                Arc::clone(&dispatcher),
                feed,
                shutdown_rx.clone(),
            ))
        })
        .collect();

    info!(cameras = cameras.len(), fps = cli.fps, "cameras running");

    let deadline = async {
        match cli.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("received Ctrl-C, stopping cameras");
        }
        () = deadline => {
            info!("run duration elapsed, stopping cameras");
        }
    }

    let _ = shutdown_tx.send(true);
    dispatcher.shutdown();

    let mut reports = Vec::with_capacity(cameras.len());
    for handle in cameras {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "camera task failed"),
        }
    }

    let summary = serde_json::json!({
        "stats": dispatcher.stats(),
        "gate": dispatcher.gate_stats(),
        "cameras": reports,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_health_check_needs_no_frame() {
        let cli = Cli::try_parse_from(["frame-dispatch", "--health-check"]).unwrap();
        assert!(cli.health_check);
        assert!(cli.frame.is_none());
    }

    #[test]
    fn test_frame_required_otherwise() {
        assert!(Cli::try_parse_from(["frame-dispatch"]).is_err());
    }

    #[test]
    fn test_frame_period() {
        let cli =
            Cli::try_parse_from(["frame-dispatch", "--frame", "f.b64", "--fps", "4"]).unwrap();
        assert_eq!(cli.frame_period().unwrap(), Duration::from_millis(250));

        let cli =
            Cli::try_parse_from(["frame-dispatch", "--frame", "f.b64", "--fps", "0"]).unwrap();
        assert!(cli.frame_period().is_err());
    }

    #[test]
    fn test_cli_urls_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[connection]\nurl = \"ws://from-file:8000/ws/inference\"\n"
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "frame-dispatch",
            "--health-check",
            "--config",
            file.path().to_str().unwrap(),
            "--http-url",
            "http://from-cli:9000/api/inference",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();

        assert_eq!(config.connection.url, "ws://from-file:8000/ws/inference");
        assert_eq!(config.fallback.url, "http://from-cli:9000/api/inference");
    }
}
