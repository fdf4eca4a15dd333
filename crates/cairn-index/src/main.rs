//! cairn-index — the Cairn index registry.
//!
//! Usage: `cairn-index [port]`

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use cairn_core::config::CairnConfig;
use cairn_services::IndexRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    if let Some(arg) = std::env::args().nth(1) {
        config.index.port = arg
            .parse()
            .with_context(|| format!("invalid port argument {arg:?}"))?;
    }

    let bind = SocketAddr::new(config.index.bind_addr, config.index.port);
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind index socket on {bind}"))?;
    tracing::info!(
        %bind,
        max_entries = config.index.max_entries,
        "cairn-index starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    IndexRegistry::new(config.index.max_entries)
        .serve(socket, shutdown_rx)
        .await
        .context("index registry failed")?;

    Ok(())
}
