//! VOIDFALL - Persistent Multiplayer Space Combat Server
//!
//! Binary entry point: loads configuration from the environment, brings
//! up the runtime (store, caches, battle scheduler, write-back timers),
//! and runs until interrupted.

use std::sync::Arc;

use voidfall::{GameRuntime, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with configurable level
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("═══════════════════════════════════════════════════════════");
    log::info!("  VOIDFALL - Persistent Multiplayer Space Combat Server");
    log::info!("  Version: {}", voidfall::VERSION);
    log::info!("═══════════════════════════════════════════════════════════");

    let config = ServerConfig::from_env();
    log::info!("Database: {}", config.database_url);
    log::info!(
        "World: {}x{}, tick every {} ms",
        config.world_width,
        config.world_height,
        config.tick_interval_ms
    );

    let runtime = Arc::new(GameRuntime::new(config).await?);
    runtime.start();
    log::info!("Server core running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    log::info!("Interrupt received, shutting down");
    runtime.shutdown().await?;

    log::info!("═══════════════════════════════════════════════════════════");
    log::info!("  VOIDFALL shutdown complete");
    log::info!("═══════════════════════════════════════════════════════════");
    Ok(())
}
