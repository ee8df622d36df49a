#![forbid(unsafe_code)]

//! `cell-handoff`: two-manipulator conveyor handoff controller.
//!
//! Loads configuration, brings up both controllers and runs the worker and
//! conveyor tasks until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cell_handoff::config::GlobalConfig;
use cell_handoff::driver::iolink::IoLinkGateway;
use cell_handoff::driver::sim::SimRig;
use cell_handoff::driver::SensorGateway;
use cell_handoff::orchestrator::{events, runtime};
use cell_handoff::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cell-handoff", about = "Two-manipulator conveyor handoff controller", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("cell-handoff bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(path = %args.config.display(), "configuration loaded");

    // ── Collaborators ───────────────────────────────────
    let rig = SimRig::from_config(&config);
    let mut collaborators = rig.collaborators();
    if let Some(gateway) = &config.sensor_gateway {
        let sensors: Arc<dyn SensorGateway> = Arc::new(IoLinkGateway::new(
            gateway.url.clone(),
            Duration::from_millis(gateway.timeout_ms),
        )?);
        collaborators.sensors = sensors;
        info!(url = gateway.url, "using io-link sensor gateway");
    } else {
        warn!("no sensor gateway configured, using simulated sensors");
    }

    // ── Start the cell ──────────────────────────────────
    let ct = CancellationToken::new();
    let prepared = runtime::prepare(&config, collaborators).await?;
    let logger = events::spawn_event_logger(prepared.coordinator().subscribe(), ct.clone());
    let cell = prepared.spawn(ct.clone());
    info!("cell ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    cell.shutdown().await;
    events::join_event_logger(logger).await;
    info!("cell-handoff shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
