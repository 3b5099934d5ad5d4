//! WPAN Sniffer - IEEE 802.15.4 capture with a network interpreter
//!
//! Captures frames from one or more CC2531 dongles (or replayed captures),
//! hops them across the assigned channels, forwards every frame as a TLV
//! record over UDP or a local datagram socket, and decodes the records in
//! an interpreter running in the same process.

mod capture;
mod config;
mod coordinator;
mod dongle;
mod forward;
mod interpreter;
mod position;
mod protocol;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{Cli, Config};
use coordinator::Coordinator;

/// Grace period for blocking reads still running at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries the interpreted frames
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(cli.log_level()).into()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   WPAN Sniffer - IEEE 802.15.4");
    info!("===========================================");

    let config = Config::from_cli(cli).context("Invalid interpreter address")?;

    info!("Configuration:");
    info!("  Channels: {:?}", config.channels);
    info!("  Dwell period: {:?}", config.capture.dwell);
    info!("  Interpreter: {}", config.interpreter.endpoint);
    info!("  Protocol generation: {}", config.forward.generation);
    info!("  Position device: {}", config.position.device.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(Coordinator::new(config).run(shutdown_signal()));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C, shutting down: {}", e);
    }
}
