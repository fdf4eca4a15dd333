//! cairn-core — wire format and configuration shared by the index registry
//! and peer nodes. All other Cairn crates depend on this one.

pub mod config;
pub mod wire;

pub use config::CairnConfig;
pub use wire::{ControlRecord, Kind, Reply, SimpleRecord, WireError};
