//! Source IP cache
//!
//! Maps a connection's source IP to the descriptor of the container that
//! owns it. Entries are filled on a resolver miss and dropped when the
//! lifecycle monitor sees the container change; the whole cache is cleared
//! when the event stream reconnects because events may have been missed.
//!
//! A resolver fill races with invalidation: the container may die between
//! the inspect and the insert. Fills therefore carry the [`Generation`]
//! read before the runtime was queried, and are refused if any
//! invalidation happened since.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;

use crate::runtime::ContainerDescriptor;

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that fell through to a container scan
    pub misses: u64,
    /// Entries dropped by container events
    pub invalidations: u64,
    /// Entries currently cached
    pub entries: usize,
}

/// Invalidation counter value observed before a runtime query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Concurrent source IP to container map
#[derive(Debug, Default)]
pub struct SourceCache {
    by_ip: DashMap<IpAddr, ContainerDescriptor>,
    ip_by_id: DashMap<String, IpAddr>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl SourceCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the container owning `ip`
    pub fn get(&self, ip: IpAddr) -> Option<ContainerDescriptor> {
        if let Some(entry) = self.by_ip.get(&ip) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Current invalidation generation; read it before querying the runtime
    #[must_use]
    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    /// Remember `desc` as the owner of its IP address.
    ///
    /// Descriptors without an address are not cached.
    pub fn insert(&self, desc: &ContainerDescriptor) {
        let Some(ip) = desc.ip_address else {
            return;
        };
        if let Some(old_ip) = self.ip_by_id.insert(desc.id.clone(), ip) {
            if old_ip != ip {
                self.by_ip.remove(&old_ip);
            }
        }
        self.by_ip.insert(ip, desc.clone());
    }

    /// Insert `desc` unless an invalidation happened after `seen` was read.
    ///
    /// Returns whether the entry was kept.
    pub fn insert_if_current(&self, desc: &ContainerDescriptor, seen: Generation) -> bool {
        if self.generation() != seen {
            trace!("Refusing stale source cache fill for {}", desc.id);
            return false;
        }
        self.insert(desc);

        // An invalidation that slipped in between the check and the insert
        if self.generation() != seen {
            self.remove_entry(&desc.id);
            trace!("Rolled back stale source cache fill for {}", desc.id);
            return false;
        }
        true
    }

    /// Drop whatever is cached for container `id`
    pub fn invalidate(&self, id: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(ip) = self.remove_entry(id) {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            trace!("Invalidated source cache entry {} ({})", ip, id);
        }
    }

    fn remove_entry(&self, id: &str) -> Option<IpAddr> {
        let (_, ip) = self.ip_by_id.remove(id)?;
        self.by_ip.remove_if(&ip, |_, desc| desc.id == id);
        Some(ip)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.by_ip.clear();
        self.ip_by_id.clear();
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    /// Check if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
