//! ISP Event Replay - Main Entry Point
//!
//! Usage: `isp-replay [config.toml]`

mod config;
mod engine;
mod replay;

use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::ReplayConfig;

/// Initialize logging
fn init_logging(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", level))?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1);
    let config = ReplayConfig::load(path.as_deref())?;
    init_logging(&config.log_level)?;

    info!("=== ISP Event Replay v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        steps = config.steps.len(),
        topology = ?config.session.topology,
        "Replaying engine script"
    );

    let summary = replay::run(&config).await?;

    info!(
        steps = summary.steps,
        delivered = summary.delivered,
        dropped = summary.dropped,
        reclaimed = summary.reclaimed,
        failed = summary.failed,
        stats_returned = summary.stats_returned,
        "Replay finished"
    );
    info!(
        frames = summary.consumer.frames,
        stats = summary.consumer.stats,
        messages = summary.consumer.messages,
        post_process = summary.consumer.post_process,
        errors = summary.consumer.errors,
        "Consumer"
    );
    info!(
        reserved = summary.pool.reserved,
        exhausted = summary.pool.exhausted,
        released = summary.pool.released,
        "Buffer pool"
    );
    Ok(())
}
