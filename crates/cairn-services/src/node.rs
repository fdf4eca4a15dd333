//! Peer node — the control-plane client and the set of published items.
//!
//! Only the owner of a `PeerNode` talks to the registry, so control-plane
//! requests are strictly request-then-reply. Inbound downloads run on their
//! own tasks: each published item owns an accept loop, and each accepted
//! connection is served by a task of its own.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use cairn_core::wire::{
    check_name, ControlRecord, Kind, Reply, SimpleRecord, WireError, SIMPLE_RECORD_LEN,
};

use crate::transfer::{self, TransferError};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The registry answered with an Error record.
    #[error("{0}")]
    Rejected(String),

    #[error("no response from index server")]
    Timeout,

    #[error("unexpected reply from index server: {0:?}")]
    UnexpectedReply(Reply),

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("invalid content name {0:?}")]
    InvalidName(String),

    #[error("no local file {0}")]
    MissingFile(PathBuf),

    #[error("{0} is not published by this peer")]
    NotPublished(String),
}

// ── Index client ──────────────────────────────────────────────────────────────

/// A publisher chosen by the registry for a Search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub publisher: String,
    pub addr: SocketAddrV4,
}

/// Control-plane connection to the registry.
pub struct IndexClient {
    socket: UdpSocket,
    search_timeout: Duration,
}

impl IndexClient {
    pub async fn connect(index: SocketAddr, search_timeout: Duration) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(index).await?;
        tracing::debug!(%index, local = %socket.local_addr()?, "index client connected");
        Ok(Self {
            socket,
            search_timeout,
        })
    }

    pub async fn register(
        &mut self,
        peer: &str,
        content: &str,
        addr: SocketAddrV4,
    ) -> Result<(), PeerError> {
        let request = ControlRecord::new(Kind::Register, peer, content).with_addr(addr);
        self.expect_ack(request).await
    }

    /// Ask the registry for the least-used publisher of `content`.
    pub async fn search(&mut self, peer: &str, content: &str) -> Result<SearchHit, PeerError> {
        let request = ControlRecord::new(Kind::Search, peer, content);
        let limit = self.search_timeout;
        match self.exchange(request, Some(limit)).await? {
            Reply::Control(hit) if hit.kind == Kind::Search => match hit.addr {
                Some(addr) => Ok(SearchHit {
                    publisher: hit.peer_name,
                    addr,
                }),
                None => Err(PeerError::UnexpectedReply(Reply::Control(hit))),
            },
            Reply::Simple(SimpleRecord {
                kind: Kind::Error,
                text,
            }) => Err(PeerError::Rejected(text)),
            other => Err(PeerError::UnexpectedReply(other)),
        }
    }

    pub async fn deregister(&mut self, peer: &str, content: &str) -> Result<(), PeerError> {
        let request = ControlRecord::new(Kind::Deregister, peer, content);
        self.expect_ack(request).await
    }

    /// The registry's listing of active entries, one `content (by peer)` per line.
    pub async fn online(&mut self) -> Result<String, PeerError> {
        let request = ControlRecord::new(Kind::Online, "", "");
        match self.exchange(request, None).await? {
            Reply::Simple(SimpleRecord {
                kind: Kind::Online,
                text,
            }) => Ok(text),
            Reply::Simple(SimpleRecord {
                kind: Kind::Error,
                text,
            }) => Err(PeerError::Rejected(text)),
            other => Err(PeerError::UnexpectedReply(other)),
        }
    }

    pub async fn quit(&mut self, peer: &str) -> Result<(), PeerError> {
        let request = ControlRecord::new(Kind::Quit, peer, "");
        self.expect_ack(request).await
    }

    async fn expect_ack(&mut self, request: ControlRecord) -> Result<(), PeerError> {
        match self.exchange(request, None).await? {
            Reply::Simple(SimpleRecord {
                kind: Kind::Acknowledge,
                ..
            }) => Ok(()),
            Reply::Simple(SimpleRecord {
                kind: Kind::Error,
                text,
            }) => Err(PeerError::Rejected(text)),
            other => Err(PeerError::UnexpectedReply(other)),
        }
    }

    /// Send one request and wait for one reply.
    async fn exchange(
        &mut self,
        request: ControlRecord,
        limit: Option<Duration>,
    ) -> Result<Reply, PeerError> {
        let mut buf = vec![0u8; SIMPLE_RECORD_LEN + 1];

        // A reply that arrived after an earlier timeout must not answer this request.
        while let Ok(stale) = self.socket.try_recv(&mut buf) {
            tracing::debug!(len = stale, "discarding stale index reply");
        }

        self.socket.send(&request.encode()).await?;
        tracing::trace!(kind = ?request.kind, content = %request.content_name, "index request sent");

        let len = match limit {
            Some(limit) => timeout(limit, self.socket.recv(&mut buf))
                .await
                .map_err(|_| PeerError::Timeout)??,
            None => self.socket.recv(&mut buf).await?,
        };
        Ok(Reply::decode(&buf[..len])?)
    }
}

// ── Published items ───────────────────────────────────────────────────────────

/// One item this peer serves. Dropping it stops the accept loop and closes
/// the listening socket.
pub struct PublishedItem {
    content: String,
    addr: SocketAddrV4,
    accept_task: JoinHandle<()>,
}

impl PublishedItem {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }
}

impl Drop for PublishedItem {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, content: String, content_dir: Arc<PathBuf>) {
    loop {
        let (stream, from) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(%content, error = %e, "accept failed");
                continue;
            }
        };
        tracing::debug!(%content, %from, "download connection accepted");

        let content = content.clone();
        let content_dir = Arc::clone(&content_dir);
        tokio::spawn(async move {
            match transfer::serve_download(stream, &content, &content_dir).await {
                Ok(bytes) => tracing::info!(%content, %from, bytes, "served download"),
                Err(e) => tracing::warn!(%content, %from, error = %e, "download refused"),
            }
        });
    }
}

// ── Peer node ─────────────────────────────────────────────────────────────────

pub struct PeerNode {
    name: String,
    client: IndexClient,
    content_dir: Arc<PathBuf>,
    listen_ip: Ipv4Addr,
    published: Vec<PublishedItem>,
}

impl PeerNode {
    pub fn new(name: &str, client: IndexClient, content_dir: &Path, listen_ip: Ipv4Addr) -> Self {
        Self {
            name: name.to_string(),
            client,
            content_dir: Arc::new(content_dir.to_path_buf()),
            listen_ip,
            published: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Items currently served, oldest first.
    pub fn published(&self) -> &[PublishedItem] {
        &self.published
    }

    /// Everything currently active in the registry.
    pub async fn list(&mut self) -> Result<String, PeerError> {
        self.client.online().await
    }

    /// Serve a local file and register it. Returns the listener address.
    pub async fn publish(&mut self, content: &str) -> Result<SocketAddrV4, PeerError> {
        check_name(content).map_err(|_| PeerError::InvalidName(content.to_string()))?;
        let path = transfer::content_path(&self.content_dir, content)
            .map_err(|_| PeerError::InvalidName(content.to_string()))?;
        if !path.is_file() {
            return Err(PeerError::MissingFile(path));
        }

        let listener = TcpListener::bind((self.listen_ip, 0)).await?;
        let addr = match listener.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => SocketAddrV4::new(self.listen_ip, addr.port()),
        };

        // A rejected registration drops the listener unused.
        self.client.register(&self.name, content, addr).await?;

        let accept_task = tokio::spawn(accept_loop(
            listener,
            content.to_string(),
            Arc::clone(&self.content_dir),
        ));
        self.published.push(PublishedItem {
            content: content.to_string(),
            addr,
            accept_task,
        });
        tracing::info!(%content, %addr, "published");
        Ok(addr)
    }

    /// Fetch `content` from the publisher the registry picks, then publish
    /// the local copy. Returns the publisher and the byte count.
    ///
    /// A failed re-publish is logged and does not fail the download.
    pub async fn download(&mut self, content: &str) -> Result<(SearchHit, u64), PeerError> {
        check_name(content).map_err(|_| PeerError::InvalidName(content.to_string()))?;

        let hit = self.client.search(&self.name, content).await?;
        tracing::info!(%content, publisher = %hit.publisher, addr = %hit.addr, "downloading");

        let bytes = transfer::download(SocketAddr::V4(hit.addr), content, &self.content_dir).await?;

        if let Err(e) = self.publish(content).await {
            tracing::warn!(%content, error = %e, "re-publish after download failed");
        }
        Ok((hit, bytes))
    }

    /// Deregister `content` and close its listener.
    pub async fn unpublish(&mut self, content: &str) -> Result<(), PeerError> {
        let position = self
            .published
            .iter()
            .position(|item| item.content == content)
            .ok_or_else(|| PeerError::NotPublished(content.to_string()))?;

        self.client.deregister(&self.name, content).await?;
        let item = self.published.remove(position);
        tracing::info!(content = %item.content, addr = %item.addr, "unpublished");
        Ok(())
    }

    /// Deregister every item, close every listener and send Quit.
    ///
    /// Deregistration failures are logged and do not stop the rest.
    pub async fn leave(mut self) -> Result<(), PeerError> {
        for item in std::mem::take(&mut self.published) {
            if let Err(e) = self.client.deregister(&self.name, &item.content).await {
                tracing::warn!(content = %item.content, error = %e, "deregister on leave failed");
            }
        }
        self.client.quit(&self.name).await?;
        tracing::info!(peer = %self.name, "left the network");
        Ok(())
    }
}
