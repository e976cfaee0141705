//! Scorebridge Agent
//!
//! Supervising process of the bridge: reads captured platform frames, keeps
//! the local scoreboard, and relays events to the coordination backend.

mod capture;
mod diagnostics;
mod relay;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use scorebridge_core::decoder::ChannelSink;
use scorebridge_core::{
    BridgeConfig, BridgeContext, DeviceId, FrameDecoder, ReconciliationEngine, RoomTopics,
    TransportClient,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::relay::Relay;

/// Captured frames waiting for the decoder
const CAPTURE_BUFFER: usize = 1024;

/// Scorebridge Agent - live engagement bridge for stream overlays
#[derive(Parser, Debug)]
#[command(name = "scorebridge")]
#[command(author = "Scorebridge Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relays captured live-stream gifts to the scoreboard backend", long_about = None)]
struct Args {
    /// Config file (JSON); defaults to <config dir>/scorebridge/config.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend endpoint (tcp://, ws(s):// or http(s)://)
    #[arg(short, long)]
    url: Option<String>,

    /// Bearer token for the backend
    #[arg(short, long)]
    token: Option<String>,

    /// Backend room id
    #[arg(short, long)]
    room: Option<String>,

    /// Platform room id used when a captured frame omits it
    #[arg(long)]
    platform_room: Option<String>,

    /// Read captured frames from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Mirror raw frames to this file
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level)?;

    info!("Starting Scorebridge Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let device_id = DeviceId::detect(Some(&device_salt()?));
    let context = BridgeContext::new(device_id);
    info!(device = %context.device_id(), room = %config.room_id, "Bridge context ready");

    // Decoder, with the diagnostic mirror when requested
    let mut decoder = FrameDecoder::new(&config.decoder);
    let mut diagnostics_task = None;
    if let Some(path) = config.diagnostics_path.clone() {
        let (sink, rx) = ChannelSink::new(config.decoder.mirror_capacity);
        decoder = decoder.with_sink(Arc::new(sink));
        diagnostics_task = Some(tokio::spawn(async move {
            if let Err(e) = diagnostics::run(rx, &path).await {
                error!("Diagnostics writer stopped: {:#}", e);
            }
        }));
    }

    let engine = Arc::new(ReconciliationEngine::new(&config.reconcile));
    let client = TransportClient::new(config.transport.clone())
        .context("Failed to create transport client")?;
    let relay = Arc::new(Relay::new(
        context,
        RoomTopics::new(config.room_id.clone()),
        Arc::new(decoder),
        engine,
        client.clone(),
    ));

    relay
        .subscribe_room()
        .await
        .context("Failed to register room subscriptions")?;

    // The bridge keeps capturing while the backend is unreachable
    match client.connect().await {
        Ok(()) => info!("Connected to backend"),
        Err(e) => {
            warn!("Initial backend connect failed: {}, retrying in background", e);
            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.reconnect().await {
                    error!("Backend unreachable: {}", e);
                }
            });
        }
    }

    let shutdown = CancellationToken::new();
    let (frame_tx, frame_rx) = mpsc::channel(CAPTURE_BUFFER);

    let input = capture::open(args.input.as_deref()).await?;
    let capture_handle = tokio::spawn(capture::run(input, frame_tx));

    let capture_loop = {
        let relay = relay.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { relay.run_capture(frame_rx, shutdown).await })
    };
    let timer_loop = {
        let relay = relay.clone();
        let shutdown = shutdown.clone();
        let period = config.reconcile.tick_interval();
        tokio::spawn(async move { relay.run_timer(period, shutdown).await })
    };

    // Wait for shutdown signal
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to setup SIGTERM handler")?;
    let mut state = client.watch_state();

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = state.wait_for(|s| s.is_terminal()) => {
            if result.is_ok() {
                error!("Backend connection closed for good, shutting down...");
            }
        }
    }

    shutdown.cancel();
    capture_handle.abort();
    client.disconnect().await;
    for handle in [capture_loop, timer_loop] {
        if let Err(e) = handle.await {
            warn!("Task ended abnormally: {}", e);
        }
    }

    let board = relay.engine().snapshot();
    info!(scores = ?board.scores(), seq = board.last_applied_seq, "Final scoreboard");

    // Decoder (and its sink) is dropped with the relay, closing the mirror channel
    drop(relay);
    if let Some(task) = diagnostics_task {
        let _ = task.await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Config file, then CLI overrides, then validation
fn load_config(args: &Args) -> Result<BridgeConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = match path {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            BridgeConfig::from_json_file(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        Some(path) if args.config.is_some() => {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        _ => BridgeConfig::default(),
    };

    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn apply_overrides(config: &mut BridgeConfig, args: &Args) {
    if let Some(url) = &args.url {
        config.transport.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.transport.token = Some(token.clone());
    }
    if let Some(room) = &args.room {
        config.room_id = room.clone();
    }
    if let Some(room) = &args.platform_room {
        config.decoder.room_id = room.clone();
    }
    if let Some(path) = &args.diagnostics {
        config.diagnostics_path = Some(path.clone());
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scorebridge").join("config.json"))
}

/// Per-install salt for the device id, created on first run
fn device_salt() -> Result<String> {
    let Some(dir) = dirs::data_local_dir().map(|d| d.join("scorebridge")) else {
        warn!("No data directory, device id will change between runs");
        return Ok(random_salt());
    };
    load_or_create_salt(&dir.join("device-salt"))
}

fn load_or_create_salt(path: &Path) -> Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let salt = random_salt();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, &salt)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(salt)
}

fn random_salt() -> String {
    let nonce: u128 = rand::thread_rng().gen();
    format!("{:032x}", nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["scorebridge"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = BridgeConfig::default();
        config.transport.url = "ws://file.test/ws".into();
        config.room_id = "from-file".into();

        apply_overrides(
            &mut config,
            &args(&["--url", "tcp://10.0.0.5:61613", "--room", "arena", "--platform-room", "7001"]),
        );
        assert_eq!(config.transport.url, "tcp://10.0.0.5:61613");
        assert_eq!(config.room_id, "arena");
        assert_eq!(config.decoder.room_id, "7001");
        assert!(config.transport.token.is_none());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let path = std::env::temp_dir().join("scorebridge-no-such-config.json");
        let result = load_config(&args(&["--config", path.to_str().unwrap(), "--room", "arena"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_salt_is_persisted() {
        let path = std::env::temp_dir()
            .join(format!("scorebridge-salt-{}", std::process::id()))
            .join("device-salt");
        let first = load_or_create_salt(&path).unwrap();
        let second = load_or_create_salt(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
