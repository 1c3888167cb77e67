//! Vivarium Daemon - Main entry point
//!
//! Serves the telemetry and firmware HTTP API and keeps the firmware
//! catalog in sync with the configured archive.

mod api;
mod config;
mod firmware_fetch;
mod scheduler;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::firmware_fetch::FirmwareFetcher;
use crate::scheduler::PeriodicTask;

#[derive(Parser, Debug)]
#[command(name = "vivarium")]
#[command(about = "Environmental monitoring stats and firmware server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vivarium.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database path (or `:memory:`)
    #[arg(short, long, env = "VIVARIUM_DB")]
    database: Option<String>,

    /// Firmware archive URL
    #[arg(long, env = "FIRMWARE_URL")]
    firmware_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Vivarium v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(url) = args.firmware_url {
        config.firmware.url = Some(url);
    }

    info!(
        database = %config.database.path,
        hash_policy = ?config.firmware.hash_policy,
        "Configuration loaded"
    );

    // Schema migration runs here, before any request is served
    let state = state::AppState::new(config.clone())?;

    let refresh_task = match config.firmware.url.as_deref() {
        Some(url) => {
            let fetcher = Arc::new(FirmwareFetcher::new(url, config.firmware.fetch_timeout())?);
            let state = state.clone();
            Some(PeriodicTask::spawn(
                "firmware-refresh",
                config.firmware.fetch_interval(),
                move || firmware_fetch::scheduled_refresh(fetcher.clone(), state.clone()),
            ))
        }
        None => {
            warn!("No firmware URL configured, firmware refresh disabled");
            None
        }
    };

    server::run(state, &config.daemon.bind, shutdown_signal()).await?;

    if let Some(task) = refresh_task {
        task.cancel();
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
