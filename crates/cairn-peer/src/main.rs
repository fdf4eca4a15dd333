//! cairn-peer — interactive Cairn peer node.
//!
//! Usage: `cairn-peer [index-host [index-port]]`
//!
//! Command results go to stdout; logs go to stderr (`RUST_LOG`).
//! The first Ctrl-C leaves the network; a second one exits immediately.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use tokio::io::BufReader;
use tokio::sync::broadcast;

use cairn_core::config::CairnConfig;
use cairn_core::wire::{bounded, NAME_LEN};
use cairn_services::{IndexClient, PeerNode};

mod command;
mod session;

use session::Exit;

/// Exit status after a second interrupt (128 + SIGINT).
const FORCED_EXIT: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    let mut args = std::env::args().skip(1);
    if let Some(host) = args.next() {
        config.peer.index_host = host;
    }
    if let Some(port) = args.next() {
        config.peer.index_port = port
            .parse()
            .with_context(|| format!("invalid port argument {port:?}"))?;
    }

    let index = resolve_index(&config.peer.index_host, config.peer.index_port).await?;
    let mut input = BufReader::new(tokio::io::stdin());
    let mut out = std::io::stdout();

    let name = if config.peer.name.is_empty() {
        session::prompt(&mut out, "Enter your peer name: ")?;
        session::read_line(&mut input)
            .await
            .context("no peer name given")?
    } else {
        config.peer.name.clone()
    };
    let name = bounded(name.trim(), NAME_LEN).to_string();
    if name.is_empty() {
        bail!("peer name must not be empty");
    }

    let client = IndexClient::connect(index, config.peer.search_timeout())
        .await
        .with_context(|| format!("failed to open control socket to {index}"))?;
    let mut node = PeerNode::new(&name, client, &config.peer.content_dir, config.peer.listen_addr);
    tracing::info!(
        peer = %node.name(),
        %index,
        content_dir = %node.content_dir().display(),
        "cairn-peer starting"
    );

    // ── Interrupt channel ────────────────────────────────────────────────────
    let (interrupt_tx, mut interrupt_rx) = broadcast::channel::<()>(1);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("interrupt received, leaving");
        let _ = interrupt_tx.send(());

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("second interrupt, exiting without leaving");
            std::process::exit(FORCED_EXIT);
        }
    });

    let exit = match session::run(&mut node, &mut input, &mut out, &mut interrupt_rx).await {
        Ok(exit) => exit,
        Err(e) => {
            tracing::warn!(error = %e, "console output failed");
            Exit::EndOfInput
        }
    };
    tracing::debug!(?exit, "command loop finished");

    match node.leave().await {
        Ok(()) => println!("Quit acknowledged"),
        Err(e) => println!("Quit error: {e}"),
    }
    println!("Exiting.");

    // A stdin read may still be parked on the blocking pool, and runtime
    // shutdown would wait for it.
    std::process::exit(0)
}

async fn resolve_index(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("can't resolve index host {host:?}"))?
        .find(SocketAddr::is_ipv4)
        .with_context(|| format!("index host {host:?} has no IPv4 address"))
}
