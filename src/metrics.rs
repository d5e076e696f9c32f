//! Metrics for peer discovery.
//!
//! Provides counters, gauges, and histograms for monitoring discovery health.
//!
//! ## Available Metrics
//!
//! ### Counters
//! - `discovery_cycles_total` - Completed reconciliation cycles
//! - `discovery_resolution_failures_total` - Cycles whose directory query failed on every attempt
//! - `discovery_peer_added_total` - "Peer added" notifications, reconnects included
//! - `discovery_peer_removed_total` - "Peer removed" notifications
//! - `discovery_reconnects_total` - Peers re-announced by a reconnect timer
//! - `discovery_peer_excluded_total` - Peers permanently excluded
//!
//! ### Histograms
//! - `discovery_cycle_duration_seconds` - Wall time of a reconciliation cycle, resolution included
//!
//! ### Gauges
//! - `discovery_tracked_peers` - Peers currently tracked

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize metric descriptions.
///
/// Call this once at application startup to register all metric descriptions.
pub fn init_metrics() {
    describe_counter!(
        "discovery_cycles_total",
        "Total number of completed reconciliation cycles"
    );
    describe_counter!(
        "discovery_resolution_failures_total",
        "Total number of cycles whose directory query failed on every attempt"
    );
    describe_counter!(
        "discovery_peer_added_total",
        "Total number of peer added notifications"
    );
    describe_counter!(
        "discovery_peer_removed_total",
        "Total number of peer removed notifications"
    );
    describe_counter!(
        "discovery_reconnects_total",
        "Total number of peers re-announced after a backoff delay"
    );
    describe_counter!(
        "discovery_peer_excluded_total",
        "Total number of peers permanently excluded"
    );

    describe_histogram!(
        "discovery_cycle_duration_seconds",
        "Wall time of a reconciliation cycle in seconds"
    );

    describe_gauge!("discovery_tracked_peers", "Current number of tracked peers");
}

/// Record a completed cycle.
pub fn record_cycle() {
    counter!("discovery_cycles_total").increment(1);
}

/// Record a cycle whose resolution failed.
pub fn record_resolution_failure() {
    counter!("discovery_resolution_failures_total").increment(1);
}

/// Record a "peer added" notification.
pub fn record_peer_added() {
    counter!("discovery_peer_added_total").increment(1);
}

/// Record a "peer removed" notification.
pub fn record_peer_removed() {
    counter!("discovery_peer_removed_total").increment(1);
}

/// Record a reconnect.
pub fn record_reconnect() {
    counter!("discovery_reconnects_total").increment(1);
}

/// Record a permanent exclusion.
pub fn record_peer_excluded() {
    counter!("discovery_peer_excluded_total").increment(1);
}

/// Record how long a cycle took.
pub fn record_cycle_duration(elapsed: Duration) {
    histogram!("discovery_cycle_duration_seconds").record(elapsed.as_secs_f64());
}

/// Update the tracked peers gauge.
pub fn set_tracked_peers(count: usize) {
    gauge!("discovery_tracked_peers").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        init_metrics();
        record_cycle();
        record_peer_added();
        record_cycle_duration(Duration::from_millis(5));
        set_tracked_peers(3);
    }
}
