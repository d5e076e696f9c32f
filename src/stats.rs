//! Discovery counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one discovery instance.
///
/// Every `record_*` call also feeds the `metrics` facade when that
/// feature is enabled.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    cycles: AtomicU64,
    resolution_failures: AtomicU64,
    peers_added: AtomicU64,
    peers_removed: AtomicU64,
    reconnects: AtomicU64,
    exclusions: AtomicU64,
}

impl DiscoveryStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::record_cycle();
    }

    pub(crate) fn record_resolution_failure(&self) {
        self.resolution_failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::record_resolution_failure();
    }

    pub(crate) fn record_added(&self) {
        self.peers_added.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::record_peer_added();
    }

    pub(crate) fn record_removed(&self) {
        self.peers_removed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::record_peer_removed();
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.record_added();
        #[cfg(feature = "metrics")]
        crate::metrics::record_reconnect();
    }

    pub(crate) fn record_exclusion(&self) {
        self.exclusions.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        crate::metrics::record_peer_excluded();
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            peers_added: self.peers_added.load(Ordering::Relaxed),
            peers_removed: self.peers_removed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            exclusions: self.exclusions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DiscoveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Completed reconciliation cycles.
    pub cycles: u64,
    /// Cycles whose directory query failed on every attempt.
    pub resolution_failures: u64,
    /// "Peer added" notifications, reconnects included.
    pub peers_added: u64,
    /// "Peer removed" notifications.
    pub peers_removed: u64,
    /// Peers re-announced by a reconnect timer.
    pub reconnects: u64,
    /// Peers permanently excluded.
    pub exclusions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_counts_as_add() {
        let stats = DiscoveryStats::new();
        stats.record_added();
        stats.record_reconnect();
        stats.record_removed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.peers_added, 2);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.peers_removed, 1);
        assert_eq!(snapshot.cycles, 0);
    }
}
