//! Index registry — the UDP request/response service in front of the catalog.
//!
//! Every well-formed request is answered exactly once, synchronously, to the
//! datagram's source address. Datagrams that are not exactly one
//! ControlRecord long are dropped without a reply. The receive loop is the
//! only mutator of the catalog, so it needs no locking.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use cairn_core::wire::{ControlRecord, Kind, SimpleRecord, WireError, CONTROL_RECORD_LEN};

use crate::catalog::{Catalog, CatalogError};

pub const DUPLICATE_REGISTRATION: &str = "Duplicate registration";
pub const STORAGE_FULL: &str = "Server storage full";
pub const CONTENT_NOT_FOUND: &str = "Content not found";
pub const NO_SUCH_REGISTRATION: &str = "No such registration";
pub const UNKNOWN_REQUEST: &str = "Unknown request";
pub const NO_CONTENT: &str = "No content registered";

pub struct IndexRegistry {
    catalog: Catalog,
}

impl IndexRegistry {
    pub fn new(max_entries: usize) -> Self {
        Self {
            catalog: Catalog::new(max_entries),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Handle one datagram. `None` means drop it without replying.
    pub fn handle(&mut self, datagram: &[u8]) -> Option<Vec<u8>> {
        let request = match ControlRecord::decode(datagram) {
            Ok(r) => r,
            Err(WireError::UnknownKind(kind)) => {
                tracing::debug!(kind, "unknown request kind");
                return Some(SimpleRecord::error(UNKNOWN_REQUEST).encode());
            }
            Err(e) => {
                tracing::trace!(error = %e, "dropping malformed datagram");
                return None;
            }
        };

        if !request.kind.is_index_request() {
            tracing::debug!(kind = ?request.kind, "not an index request");
            return Some(SimpleRecord::error(UNKNOWN_REQUEST).encode());
        }

        let reply = match request.kind {
            Kind::Register => self.register(&request),
            Kind::Search => return Some(self.search(&request)),
            Kind::Deregister => self.deregister(&request),
            Kind::Online => self.online(),
            Kind::Quit => self.quit(&request),
            _ => SimpleRecord::error(UNKNOWN_REQUEST),
        };
        Some(reply.encode())
    }

    fn register(&mut self, request: &ControlRecord) -> SimpleRecord {
        let addr = request
            .addr
            .unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        match self
            .catalog
            .insert(&request.peer_name, &request.content_name, addr)
        {
            Ok(_) => {
                tracing::info!(
                    publisher = %request.peer_name,
                    content = %request.content_name,
                    %addr,
                    "register"
                );
                SimpleRecord::acknowledge("Registered")
            }
            Err(CatalogError::Duplicate { .. }) => {
                tracing::debug!(
                    publisher = %request.peer_name,
                    content = %request.content_name,
                    "duplicate registration"
                );
                SimpleRecord::error(DUPLICATE_REGISTRATION)
            }
            Err(CatalogError::CapacityExceeded(max)) => {
                tracing::warn!(max, "catalog full, registration refused");
                SimpleRecord::error(STORAGE_FULL)
            }
        }
    }

    fn search(&mut self, request: &ControlRecord) -> Vec<u8> {
        let Some(index) = self.catalog.find_least_used(&request.content_name) else {
            tracing::info!(content = %request.content_name, "search: not found");
            return SimpleRecord::error(CONTENT_NOT_FOUND).encode();
        };

        let usage = self.catalog.record_hit(index);
        let Some(entry) = self.catalog.get(index) else {
            return SimpleRecord::error(CONTENT_NOT_FOUND).encode();
        };

        tracing::info!(
            content = %entry.content,
            publisher = %entry.publisher,
            addr = %entry.addr,
            used = usage.unwrap_or_default(),
            "search: hit"
        );
        ControlRecord::new(Kind::Search, &entry.publisher, &entry.content)
            .with_addr(entry.addr)
            .encode()
    }

    fn deregister(&mut self, request: &ControlRecord) -> SimpleRecord {
        match self
            .catalog
            .find_exact(&request.peer_name, &request.content_name)
        {
            Some(index) => {
                self.catalog.deactivate(index);
                tracing::info!(
                    publisher = %request.peer_name,
                    content = %request.content_name,
                    "deregister"
                );
                SimpleRecord::acknowledge("Deregistered")
            }
            None => SimpleRecord::error(NO_SUCH_REGISTRATION),
        }
    }

    fn online(&self) -> SimpleRecord {
        let mut listing = String::new();
        for entry in self.catalog.active() {
            let _ = writeln!(listing, "{} (by {})", entry.content, entry.publisher);
        }
        if listing.is_empty() {
            SimpleRecord::online(NO_CONTENT)
        } else {
            SimpleRecord::online(&listing)
        }
    }

    fn quit(&mut self, request: &ControlRecord) -> SimpleRecord {
        let removed = self.catalog.deactivate_publisher(&request.peer_name);
        tracing::info!(publisher = %request.peer_name, removed, "quit");
        SimpleRecord::acknowledge("Quit")
    }

    /// Receive loop. Returns when `shutdown` fires.
    pub async fn serve(
        mut self,
        socket: UdpSocket,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        // One spare byte so oversized datagrams are seen as oversized.
        let mut buf = vec![0u8; CONTROL_RECORD_LEN + 1];

        tracing::info!(addr = %socket.local_addr()?, "index registry listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("index registry shutting down");
                    return Ok(());
                }

                result = socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    let Some(reply) = self.handle(&buf[..len]) else {
                        continue;
                    };

                    if let Err(e) = socket.send_to(&reply, from).await {
                        tracing::warn!(%from, error = %e, "send_to failed");
                    }
                }
            }
        }
    }
}
