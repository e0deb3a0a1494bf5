//! Lucky Jet Game Server
//!
//! Runs the round orchestrator behind a WebSocket listener until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use lucky_jet::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Lucky Jet Server v{}", VERSION);
    info!(
        "Countdown: {}s, tick: {:?}, growth rate: {}",
        config.round.countdown_secs, config.round.tick_interval, config.round.growth_rate
    );

    let server = Arc::new(GameServer::new(config));
    let listener = server.bind().await.context("failed to bind game server")?;

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.serve(listener).await.context("game server failed")?;
    // Let connection tasks flush their shutdown notices.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("Server stopped");
    Ok(())
}
