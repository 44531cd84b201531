//! Connection statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic connection statistics
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections admitted past the connection limit
    total_accepted: AtomicU64,
    /// Currently active connections
    active: AtomicU64,
    /// Relays that ended with a clean EOF in both directions
    completed: AtomicU64,
    /// Relays that failed (dial failure or transfer error)
    errored: AtomicU64,
    /// Connections rejected due to limit
    rejected: AtomicU64,
    /// Connections closed because no route could be resolved
    unrouted: AtomicU64,
    /// Total bytes client -> backend
    bytes_client_to_backend: AtomicU64,
    /// Total bytes backend -> client
    bytes_backend_to_client: AtomicU64,
}

impl ConnectionStats {
    /// Create new connection statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection admitted past the limit
    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a relay that finished cleanly
    pub fn record_completed(&self, client_to_backend: u64, backend_to_client: u64) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(client_to_backend, backend_to_client);
    }

    /// Record a failed relay; bytes copied before the failure still count
    pub fn record_error(&self, client_to_backend: u64, backend_to_client: u64) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.errored.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(client_to_backend, backend_to_client);
    }

    /// Record an admitted connection that had no route
    pub fn record_unrouted(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected connection (due to limit)
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes(&self, client_to_backend: u64, backend_to_client: u64) {
        self.bytes_client_to_backend
            .fetch_add(client_to_backend, Ordering::Relaxed);
        self.bytes_backend_to_client
            .fetch_add(backend_to_client, Ordering::Relaxed);
    }

    /// Get total accepted connections
    #[must_use]
    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    /// Get currently active connections
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Get completed connections
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get errored connections
    #[must_use]
    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }

    /// Get rejected connections
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get unrouted connections
    #[must_use]
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_accepted: self.total_accepted(),
            active: self.active(),
            completed: self.completed(),
            errored: self.errored(),
            rejected: self.rejected(),
            unrouted: self.unrouted(),
            bytes_client_to_backend: self.bytes_client_to_backend.load(Ordering::Relaxed),
            bytes_backend_to_client: self.bytes_backend_to_client.load(Ordering::Relaxed),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Snapshot of connection statistics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total connections accepted
    pub total_accepted: u64,
    /// Currently active connections
    pub active: u64,
    /// Completed connections
    pub completed: u64,
    /// Errored connections
    pub errored: u64,
    /// Rejected connections
    pub rejected: u64,
    /// Unrouted connections
    pub unrouted: u64,
    /// Total bytes client -> backend
    pub bytes_client_to_backend: u64,
    /// Total bytes backend -> client
    pub bytes_backend_to_client: u64,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Get total bytes transferred (both directions)
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_client_to_backend + self.bytes_backend_to_client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lifecycle() {
        let stats = ConnectionStats::new();

        stats.record_accepted();
        stats.record_accepted();
        stats.record_accepted();
        assert_eq!(stats.active(), 3);

        stats.record_completed(100, 200);
        stats.record_error(10, 0);
        stats.record_unrouted();
        stats.record_rejected();

        let snap = stats.snapshot();
        assert_eq!(snap.total_accepted, 3);
        assert_eq!(snap.active, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.errored, 1);
        assert_eq!(snap.unrouted, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.total_bytes(), 310);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ConnectionStats::new();
        stats.record_accepted();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"total_accepted\":1"));
        assert!(json.contains("\"unrouted\":0"));
    }
}
