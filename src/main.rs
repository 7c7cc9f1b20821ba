//! # Rig Bridge
//!
//! Bidirectional serial telemetry and control bridge for bench-top lab rigs.
//!
//! This application connects to the rig over a serial port, ingests its
//! telemetry stream, logs every accepted record to CSV, and exposes the
//! control side through signals until a supervising UI takes over.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use rig_bridge::actions::ActionScheduler;
use rig_bridge::bridge::RigBridge;
use rig_bridge::config::Config;
use rig_bridge::link::transport::{list_ports, SerialPortFactory, AUTO_PORT};
use rig_bridge::link::LinkManager;
use rig_bridge::logger::TelemetryLogger;
use rig_bridge::shutdown::{ShutdownCoordinator, DEFAULT_GRACE};
use rig_bridge::state::StateStore;

/// Configuration file consulted when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "rig-bridge.toml";

/// Seconds between one-line link status reports
const STATUS_INTERVAL_SECS: u64 = 30;

/// Main entry point for the Rig Bridge application
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first CLI argument, `rig-bridge.toml`, or defaults)
///    - Set up tracing to stdout and a daily log file in the log directory
///    - Create the session telemetry CSV and open the serial link
///
/// 2. **Main Loop**
///    - The link task ingests telemetry and reconnects on its own
///    - Log a one-line status report every 30 seconds
///    - `SIGUSR1` pulses the first configured output for the default duration
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop the read loop, cancel pending action releases
///    - Drive all outputs inactive, close the transport and the CSV log
///
/// # Errors
///
/// Returns error if the configuration is invalid or the telemetry log cannot
/// be created. A missing device is not fatal; the link keeps retrying.
///
/// # Examples
///
/// Run with an explicit configuration file:
/// ```bash
/// cargo run --release -- bench.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO rig_bridge: Rig Bridge v0.1.0 starting...
/// INFO rig_bridge::link::transport: Successfully opened device at /dev/ttyUSB0 (9600 baud)
/// INFO rig_bridge::link: Link established to /dev/ttyUSB0 @ 9600 baud
/// INFO rig_bridge: Link Connected: 412 frames ok, 0 parse errors
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    std::fs::create_dir_all(&config.telemetry.log_dir)
        .with_context(|| format!("creating log directory {}", config.telemetry.log_dir))?;
    let _guard = init_tracing(&config);

    info!("Rig Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    if config.serial.port == AUTO_PORT {
        match list_ports() {
            Ok(ports) if !ports.is_empty() => {
                info!("Serial ports present: {}", ports.join(", "))
            }
            Ok(_) => warn!("No serial ports present yet, probing will retry"),
            Err(e) => warn!("Serial port enumeration failed: {}", e),
        }
    }

    let schema = Arc::new(config.frame_schema());
    let store = Arc::new(StateStore::new(config.telemetry.history_capacity));
    let logger = Arc::new(
        TelemetryLogger::create_in_dir(&config.telemetry.log_dir, &schema)
            .context("creating telemetry log")?,
    );
    info!("Logging telemetry to {}", logger.path().display());

    let factory = Arc::new(SerialPortFactory::new(
        &config.serial.port,
        config.serial.baud_rate,
        config.serial.settle_ms,
    ));
    let link = Arc::new(LinkManager::new(
        factory,
        schema.clone(),
        store.clone(),
        logger.clone(),
        config.link_policy(),
    ));
    let scheduler = Arc::new(ActionScheduler::new());
    let bridge = RigBridge::new(schema, store.clone(), link.clone(), scheduler.clone());

    let link_task = tokio::spawn(link.clone().run());

    let pulse_channel = config.frame.channels[0].name.clone();
    let pulse_duration = Duration::from_millis(config.actions.default_pulse_ms);
    let mut pulse_signal =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
            .context("installing SIGUSR1 handler")?;

    let mut status_interval = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    info!("Press Ctrl+C to exit, SIGUSR1 to pulse {:?}", pulse_channel);

    // Main supervision loop
    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let snapshot = bridge.read_snapshot();
                info!(
                    "Link {:?}: {} frames ok, {} parse errors, {} echoes, {} connects, {} disconnects",
                    snapshot.connection,
                    snapshot.stats.frames_ok,
                    snapshot.stats.parse_errors,
                    snapshot.stats.echoes,
                    snapshot.stats.connects,
                    snapshot.stats.disconnects,
                );
            }

            _ = pulse_signal.recv() => {
                match bridge.trigger_action(&pulse_channel, pulse_duration).await {
                    Ok(()) => info!(
                        "Pulsing {:?} for {} ms",
                        pulse_channel,
                        pulse_duration.as_millis()
                    ),
                    Err(e) => warn!("Pulse request refused: {}", e),
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    let coordinator = ShutdownCoordinator::new(link, scheduler, logger, link_task, DEFAULT_GRACE);
    coordinator.run().await;

    let stats = store.read().stats;
    info!(
        "Total frames received: {} ({} rejected)",
        stats.frames_ok, stats.parse_errors
    );

    Ok(())
}

/// Resolve configuration: explicit path, well-known file, or defaults.
fn load_config() -> Result<Config> {
    if let Some(path) = std::env::args().nth(1) {
        return Config::load(&path).with_context(|| format!("loading configuration from {}", path));
    }

    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        return Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("loading configuration from {}", DEFAULT_CONFIG_PATH));
    }

    Ok(Config::default())
}

/// Tracing to stdout plus a daily-rotated file under the log directory.
///
/// The returned guard must stay alive for the file writer to flush.
fn init_tracing(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender =
        tracing_appender::rolling::daily(&config.telemetry.log_dir, "rig-bridge.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    guard
}
