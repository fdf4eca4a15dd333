//! cairn-services — the index registry, its catalog, content transport and
//! the peer node built on top of them.

pub mod catalog;
pub mod node;
pub mod registry;
pub mod transfer;

pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use node::{IndexClient, PeerError, PeerNode, PublishedItem, SearchHit};
pub use registry::IndexRegistry;
pub use transfer::TransferError;
