//! Cairn integration test harness.
//!
//! Every test runs a real index registry and real peer nodes in-process
//! over loopback:
//!
//!   cargo test --test integration
//!
//! Each test gets its own registry on an ephemeral port and its own scratch
//! directories, so tests can run in parallel.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cairn_core::wire::{ControlRecord, Reply};
use cairn_services::{IndexClient, IndexRegistry, PeerNode};

mod peers;
mod registry;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(2);

/// A registry running on its own task.
pub struct TestRegistry {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestRegistry {
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("registry task panicked")??;
        Ok(())
    }
}

pub async fn spawn_registry(max_entries: usize) -> Result<TestRegistry> {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .context("failed to bind registry socket")?;
    let addr = socket.local_addr()?;
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(IndexRegistry::new(max_entries).serve(socket, rx));
    Ok(TestRegistry {
        addr,
        shutdown,
        task,
    })
}

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "cairn-it-{}-{}-{tag}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("failed to create scratch dir");
    dir
}

pub async fn spawn_peer(name: &str, index: SocketAddr, content_dir: &Path) -> Result<PeerNode> {
    let client = IndexClient::connect(index, SEARCH_TIMEOUT)
        .await
        .context("failed to connect index client")?;
    Ok(PeerNode::new(name, client, content_dir, Ipv4Addr::LOCALHOST))
}

/// A bare UDP socket connected to the registry, for wire-level tests.
pub async fn raw_socket(index: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.connect(index).await?;
    Ok(socket)
}

/// Send one encoded datagram and wait for one reply.
pub async fn send_raw(socket: &UdpSocket, datagram: &[u8]) -> Result<Reply> {
    socket.send(datagram).await?;
    let mut buf = [0u8; 256];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .context("no reply from registry")??;
    Ok(Reply::decode(&buf[..len])?)
}

pub async fn send_record(socket: &UdpSocket, record: ControlRecord) -> Result<Reply> {
    send_raw(socket, &record.encode()).await
}

/// True if the registry stays silent for `wait`.
pub async fn no_reply_within(socket: &UdpSocket, wait: Duration) -> bool {
    let mut buf = [0u8; 256];
    tokio::time::timeout(wait, socket.recv(&mut buf)).await.is_err()
}
