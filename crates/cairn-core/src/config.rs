//! Configuration system for Cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::{DEFAULT_INDEX_PORT, DEFAULT_MAX_ENTRIES, SEARCH_TIMEOUT_SECS};

/// Top-level configuration. Both binaries read the same file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub index: IndexConfig,
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Address the registry binds its UDP socket to.
    pub bind_addr: IpAddr,
    /// UDP port of the registry.
    pub port: u16,
    /// Maximum number of simultaneously active catalog entries.
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Peer name. Empty = ask on startup.
    pub name: String,
    /// Registry host name or address.
    pub index_host: String,
    /// Registry UDP port.
    pub index_port: u16,
    /// Address content listeners bind to. This is the address that gets registered.
    pub listen_addr: Ipv4Addr,
    /// Directory published files are read from and downloads are written to.
    pub content_dir: PathBuf,
    /// Bound on the wait for a Search reply.
    pub search_timeout_secs: u64,
}

impl PeerConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_INDEX_PORT,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            index_host: "localhost".to_string(),
            index_port: DEFAULT_INDEX_PORT,
            listen_addr: Ipv4Addr::LOCALHOST,
            content_dir: PathBuf::from("."),
            search_timeout_secs: SEARCH_TIMEOUT_SECS,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cairn")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read one config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(CairnConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply CAIRN_* env var overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(Ok(a)) = var("CAIRN_INDEX__BIND_ADDR").map(|v| v.parse::<IpAddr>()) {
            self.index.bind_addr = a;
        }
        if let Some(Ok(p)) = var("CAIRN_INDEX__PORT").map(|v| v.parse::<u16>()) {
            self.index.port = p;
        }
        if let Some(Ok(n)) = var("CAIRN_INDEX__MAX_ENTRIES").map(|v| v.parse::<usize>()) {
            self.index.max_entries = n;
        }
        if let Some(v) = var("CAIRN_PEER__NAME") {
            self.peer.name = v;
        }
        if let Some(v) = var("CAIRN_PEER__INDEX_HOST") {
            self.peer.index_host = v;
        }
        if let Some(Ok(p)) = var("CAIRN_PEER__INDEX_PORT").map(|v| v.parse::<u16>()) {
            self.peer.index_port = p;
        }
        if let Some(Ok(a)) = var("CAIRN_PEER__LISTEN_ADDR").map(|v| v.parse::<Ipv4Addr>()) {
            self.peer.listen_addr = a;
        }
        if let Some(v) = var("CAIRN_PEER__CONTENT_DIR") {
            self.peer.content_dir = PathBuf::from(v);
        }
        if let Some(Ok(s)) = var("CAIRN_PEER__SEARCH_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            self.peer.search_timeout_secs = s;
        }
    }
}
