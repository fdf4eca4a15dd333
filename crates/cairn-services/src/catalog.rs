//! Catalog — the registry's table of who publishes what, and where.
//!
//! Storage is append-only: unpublishing clears the `active` flag instead of
//! removing the slot, so usage counters survive for the life of the process.
//! Slot indices are stable. Capacity limits the number of *active* entries.
//!
//! The catalog has a single owner (the registry's receive loop) and no
//! interior locking.

use std::net::SocketAddrV4;

/// One publication of `content` by `publisher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub publisher: String,
    pub content: String,
    /// The publisher's content listener.
    pub addr: SocketAddrV4,
    /// Search hits served from this entry.
    pub usage: u64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("{publisher} already publishes {content}")]
    Duplicate { publisher: String, content: String },

    #[error("catalog holds the maximum of {0} active entries")]
    CapacityExceeded(usize),
}

#[derive(Debug)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    max_active: usize,
}

impl Catalog {
    pub fn new(max_active: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_active,
        }
    }

    /// Active entry with exactly this publisher and content.
    pub fn find_exact(&self, publisher: &str, content: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.active && e.publisher == publisher && e.content == content)
    }

    /// Active entry for `content` with the lowest usage counter.
    /// Ties go to the earliest inserted entry.
    pub fn find_least_used(&self, content: &str) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.active && e.content == content)
            .min_by_key(|(i, e)| (e.usage, *i))
            .map(|(i, _)| i)
    }

    /// Append a new active entry with a zero usage counter.
    pub fn insert(
        &mut self,
        publisher: &str,
        content: &str,
        addr: SocketAddrV4,
    ) -> Result<usize, CatalogError> {
        if self.find_exact(publisher, content).is_some() {
            return Err(CatalogError::Duplicate {
                publisher: publisher.to_string(),
                content: content.to_string(),
            });
        }
        if self.active_count() >= self.max_active {
            return Err(CatalogError::CapacityExceeded(self.max_active));
        }
        self.entries.push(CatalogEntry {
            publisher: publisher.to_string(),
            content: content.to_string(),
            addr,
            usage: 0,
            active: true,
        });
        Ok(self.entries.len() - 1)
    }

    /// Count a search hit against an entry. Returns the new counter value.
    pub fn record_hit(&mut self, index: usize) -> Option<u64> {
        let entry = self.entries.get_mut(index)?;
        entry.usage += 1;
        Some(entry.usage)
    }

    /// Returns false if the slot does not exist or was already inactive.
    pub fn deactivate(&mut self, index: usize) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if entry.active => {
                entry.active = false;
                true
            }
            _ => false,
        }
    }

    /// Deactivate every active entry of `publisher`. Returns how many changed.
    pub fn deactivate_publisher(&mut self, publisher: &str) -> usize {
        let mut removed = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.active && e.publisher == publisher)
        {
            entry.active = false;
            removed += 1;
        }
        removed
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    /// Active entries in insertion order.
    pub fn active(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(|e| e.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Slots ever allocated, active or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
