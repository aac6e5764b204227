//! Fleet WebSocket gateway server
//!
//! Accepts crawler-node and dashboard connections, routes their events
//! through the swarmsockets engine, and shuts the fleet down cleanly on
//! Ctrl+C.

use anyhow::Result;
use fleet_ws_gateway::{build_engine, GatewayConfig};
use std::sync::Arc;
use swarmsockets::message::{format_close_message, CLOSE_GOING_AWAY};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting Fleet WebSocket Gateway");

    let config = GatewayConfig::from_env();
    info!(?config, "configuration loaded");

    let engine = build_engine(&config);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    info!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                info!(%peer, "connection accepted");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if let Err(e) = engine.serve(stream).await {
                        warn!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let payload = format_close_message(CLOSE_GOING_AWAY, "gateway shutting down");
    if let Err(e) = engine.close_with_payload(payload).await {
        error!(error = %e, "engine shutdown failed");
    }
    // Give the write pumps a moment to flush the close frames.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("gateway stopped");
    Ok(())
}
