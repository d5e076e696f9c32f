//! One poll-diff-notify iteration.
//!
//! A cycle resolves the directory, narrows the candidates, diffs them
//! against a single registry snapshot and applies the difference:
//!
//! 1. removed peers are evicted, with "peer removed" unless already failed
//! 2. retained peers go through [`BackoffScheduler::present`]
//! 3. added peers are tracked and announced
//!
//! A resolution that fails on every attempt leaves the registry untouched.
//! Running a cycle twice against the same directory answer emits nothing
//! the second time.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::backoff::{BackoffScheduler, Presence};
use crate::config::DiscoveryConfig;
use crate::directory::{DirectoryClient, Selector};
use crate::error::{Error, Result};
use crate::membership::MembershipTransport;
use crate::partition::{PartitionOutcome, RollingUpdatePartitioner};
use crate::peer::{PeerKey, PeerRecord};
use crate::registry::{PeerRegistry, Upsert};
use crate::retry::RetryExecutor;
use crate::stats::DiscoveryStats;

/// What one cycle observed and changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether the directory answered.
    pub resolved: bool,
    /// Candidates left after filtering.
    pub candidates: usize,
    /// Peers announced for the first time.
    pub added: Vec<PeerKey>,
    /// Peers evicted because the directory stopped listing them.
    pub removed: Vec<PeerKey>,
    /// Failed peers re-announced because the directory still lists them.
    pub restored: Vec<PeerKey>,
    /// Partitioning decision of this cycle.
    pub partition: PartitionOutcome,
}

impl CycleReport {
    fn unresolved() -> Self {
        Self {
            resolved: false,
            candidates: 0,
            added: Vec::new(),
            removed: Vec::new(),
            restored: Vec::new(),
            partition: PartitionOutcome::Disabled,
        }
    }

    /// Whether the cycle left the active view unchanged.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restored.is_empty()
    }
}

/// Reconciles directory answers against the registry.
///
/// Cycles are serialized: a cycle started while another one runs waits
/// for it to finish.
pub struct ReconciliationCycle<D, T> {
    directory: Arc<D>,
    registry: Arc<PeerRegistry>,
    transport: Arc<T>,
    scheduler: BackoffScheduler<T>,
    retry: RetryExecutor,
    partitioner: RollingUpdatePartitioner,
    selector: Selector,
    local_address: Option<IpAddr>,
    require_ready: bool,
    port_range: u16,
    stats: Arc<DiscoveryStats>,
    serial: tokio::sync::Mutex<()>,
}

impl<D, T> ReconciliationCycle<D, T>
where
    D: DirectoryClient,
    T: MembershipTransport,
{
    /// Build a cycle over `registry` from `config`.
    ///
    /// Reconnect timers are armed on `runtime`. Closing `cancel` aborts a
    /// resolution that is waiting between attempts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &DiscoveryConfig,
        directory: Arc<D>,
        transport: Arc<T>,
        registry: Arc<PeerRegistry>,
        stats: Arc<DiscoveryStats>,
        runtime: Handle,
        cancel: Option<async_channel::Receiver<()>>,
    ) -> Self {
        let scheduler = BackoffScheduler::new(
            registry.clone(),
            transport.clone(),
            config.backoff_policy(),
            stats.clone(),
            runtime,
        );

        let mut retry = RetryExecutor::new(config.operation_attempts, config.operation_sleep)
            .with_attempt_timeout(config.attempt_timeout());
        if let Some(cancel) = cancel {
            retry = retry.with_cancellation(cancel);
        }

        Self {
            directory,
            registry,
            transport,
            scheduler,
            retry,
            partitioner: RollingUpdatePartitioner::new(
                config.split_clusters_during_rolling_update,
                config.local_address,
            ),
            selector: config.selector.clone(),
            local_address: config.local_address,
            require_ready: config.require_ready,
            port_range: config.port_range,
            stats,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    /// Scheduler driving the failure state of this cycle's peers.
    pub fn scheduler(&self) -> &BackoffScheduler<T> {
        &self.scheduler
    }

    /// Registry this cycle reconciles.
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Run one cycle.
    ///
    /// Only cancellation and shutdown are reported as errors; a directory
    /// outage yields a report with `resolved == false`.
    pub async fn run(&self) -> Result<CycleReport> {
        let _serial = self.serial.lock().await;
        if self.registry.is_closed() {
            return Err(Error::Shutdown);
        }
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let resolved = self
            .retry
            .execute_optional("list peers", || self.directory.list_peers(&self.selector))
            .await?;

        let Some(resolved) = resolved else {
            tracing::warn!(
                directory = %self.directory.describe(),
                selector = %self.selector,
                attempts = self.retry.attempts(),
                "failed to resolve peers, keeping the current view"
            );
            self.stats.record_resolution_failure();
            self.stats.record_cycle();
            return Ok(CycleReport::unresolved());
        };

        let (candidates, partition) = self.filter(resolved);
        let report = self.apply(candidates, partition);
        self.stats.record_cycle();
        #[cfg(feature = "metrics")]
        {
            crate::metrics::set_tracked_peers(self.registry.len());
            crate::metrics::record_cycle_duration(started.elapsed());
        }
        Ok(report)
    }

    fn filter(&self, resolved: Vec<PeerRecord>) -> (BTreeMap<PeerKey, PeerRecord>, PartitionOutcome) {
        let mut candidates = expand_ports(resolved, self.port_range);
        let partition = self.partitioner.partition(&mut candidates);

        if let Some(local) = self.local_address {
            candidates.retain(|c| !c.matches_address(&local));
        }
        if self.require_ready {
            candidates.retain(|c| {
                if !c.ready {
                    tracing::trace!(peer = %c, "skipping peer that is not ready");
                }
                c.ready
            });
        }

        let mut by_key = BTreeMap::new();
        for record in candidates {
            let key = record.key();
            if self.registry.is_excluded(&key) {
                continue;
            }
            by_key.entry(key).or_insert(record);
        }
        (by_key, partition)
    }

    fn apply(
        &self,
        mut candidates: BTreeMap<PeerKey, PeerRecord>,
        partition: PartitionOutcome,
    ) -> CycleReport {
        let tracked: BTreeSet<PeerKey> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|peer| peer.key)
            .collect();

        let mut report = CycleReport {
            resolved: true,
            candidates: candidates.len(),
            added: Vec::new(),
            removed: Vec::new(),
            restored: Vec::new(),
            partition,
        };

        for key in tracked.iter().filter(|k| !candidates.contains_key(*k)) {
            let evicted = self.registry.remove_with(key, |peer| {
                if !peer.failed {
                    self.transport.on_peer_removed(key);
                    self.stats.record_removed();
                }
            });
            if evicted.is_some() {
                tracing::info!(peer = %key, "peer no longer listed, removed");
                report.removed.push(key.clone());
            }
        }

        for key in tracked.iter() {
            let Some(record) = candidates.remove(key) else {
                continue;
            };
            if let Presence::Restored { counters_reset } = self.scheduler.present(record) {
                tracing::info!(peer = %key, counters_reset, "failed peer listed again, restored");
                report.restored.push(key.clone());
            }
        }

        for (key, record) in candidates {
            match self.registry.upsert(record) {
                Upsert::Inserted(_) => {
                    let announced = self.registry.with_slot(&key, |slot| {
                        if slot.peer.failed {
                            return false;
                        }
                        self.transport.on_peer_added(&slot.peer.record);
                        self.stats.record_added();
                        true
                    });
                    if announced == Some(true) {
                        tracing::info!(peer = %key, "peer discovered, added");
                        report.added.push(key);
                    }
                }
                Upsert::Updated(_) => {
                    tracing::trace!(peer = %key, "peer appeared during reconciliation");
                }
                Upsert::Excluded | Upsert::Closed => {}
            }
        }

        report
    }
}

/// Announce each record on `port..=port + port_range`.
///
/// Records without a port are kept as they are.
pub fn expand_ports(records: Vec<PeerRecord>, port_range: u16) -> Vec<PeerRecord> {
    if port_range == 0 {
        return records;
    }
    let mut expanded = Vec::with_capacity(records.len() * (usize::from(port_range) + 1));
    for record in records {
        if record.port == 0 {
            expanded.push(record);
            continue;
        }
        for offset in 0..=port_range {
            let Some(port) = record.port.checked_add(offset) else {
                break;
            };
            expanded.push(PeerRecord {
                port,
                ..record.clone()
            });
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, ScriptedDirectory, TransportCall};
    use std::time::Duration;

    fn config() -> DiscoveryConfig {
        DiscoveryConfig::new()
            .with_operation_attempts(2)
            .with_operation_sleep(Duration::from_millis(10))
    }

    fn cycle(
        config: &DiscoveryConfig,
        directory: &Arc<ScriptedDirectory>,
    ) -> (
        ReconciliationCycle<ScriptedDirectory, RecordingTransport>,
        Arc<RecordingTransport>,
    ) {
        let transport = Arc::new(RecordingTransport::new());
        let cycle = ReconciliationCycle::new(
            config,
            directory.clone(),
            transport.clone(),
            Arc::new(PeerRegistry::new(config.initial_reconnect_delay)),
            Arc::new(DiscoveryStats::new()),
            Handle::current(),
            None,
        );
        (cycle, transport)
    }

    fn peer(ip: &str) -> PeerRecord {
        PeerRecord::new(ip, 7800)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_is_idempotent() {
        let directory = Arc::new(ScriptedDirectory::repeating(vec![peer("10.0.0.1"), peer("10.0.0.2")]));
        let (cycle, transport) = cycle(&config(), &directory);

        let first = cycle.run().await.unwrap();
        assert_eq!(first.added.len(), 2);

        let second = cycle.run().await.unwrap();
        assert!(second.is_noop());
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diff_emits_exact_changes() {
        let directory = Arc::new(ScriptedDirectory::new());
        directory.push_ok(vec![peer("10.0.0.1"), peer("10.0.0.2")]);
        directory.push_ok(vec![peer("10.0.0.2"), peer("10.0.0.3")]);
        let (cycle, transport) = cycle(&config(), &directory);

        cycle.run().await.unwrap();
        transport.clear();
        let report = cycle.run().await.unwrap();

        assert_eq!(report.added, vec![peer("10.0.0.3").key()]);
        assert_eq!(report.removed, vec![peer("10.0.0.1").key()]);
        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Removed(peer("10.0.0.1").key()),
                TransportCall::Added(peer("10.0.0.3").key()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_keeps_view() {
        let directory = Arc::new(ScriptedDirectory::new());
        directory.push_ok(vec![peer("10.0.0.1")]);
        directory.push_err("connection refused");
        directory.push_err("connection refused");
        let (cycle, transport) = cycle(&config(), &directory);

        cycle.run().await.unwrap();
        let report = cycle.run().await.unwrap();

        assert!(!report.resolved);
        assert_eq!(cycle.registry().len(), 1);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(directory.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_directory_error_fails_cycle_once() {
        struct Misconfigured(std::sync::atomic::AtomicU32);

        impl DirectoryClient for Misconfigured {
            async fn list_peers(&self, _selector: &Selector) -> Result<Vec<PeerRecord>> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(Error::Config("unsupported selector".into()))
            }
        }

        let config = config().with_operation_attempts(3);
        let directory = Arc::new(Misconfigured(Default::default()));
        let cycle = ReconciliationCycle::new(
            &config,
            directory.clone(),
            Arc::new(RecordingTransport::new()),
            Arc::new(PeerRegistry::new(config.initial_reconnect_delay)),
            Arc::new(DiscoveryStats::new()),
            Handle::current(),
            None,
        );

        let report = cycle.run().await.unwrap();

        assert!(!report.resolved);
        assert_eq!(directory.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_is_never_announced() {
        let config = config().with_local_address("10.0.0.1".parse().unwrap());
        let directory = Arc::new(ScriptedDirectory::repeating(vec![peer("10.0.0.1"), peer("10.0.0.2")]));
        let (cycle, transport) = cycle(&config, &directory);

        let report = cycle.run().await.unwrap();

        assert_eq!(report.added, vec![peer("10.0.0.2").key()]);
        assert_eq!(transport.added_count(&peer("10.0.0.1").key()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_then_skip_self() {
        let config = config()
            .with_local_address("10.0.0.1".parse().unwrap())
            .with_rolling_update_split(true);
        let directory = Arc::new(ScriptedDirectory::repeating(vec![
            peer("10.0.0.1").with_group_key("g1"),
            peer("10.0.0.2").with_group_key("g1"),
            peer("10.0.0.3").with_group_key("g2"),
        ]));
        let (cycle, _transport) = cycle(&config, &directory);

        let report = cycle.run().await.unwrap();

        assert_eq!(report.added, vec![peer("10.0.0.2").key()]);
        assert!(matches!(report.partition, PartitionOutcome::Partitioned { kept: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_ready_filters_candidates() {
        let config = config().with_require_ready(true);
        let directory = Arc::new(ScriptedDirectory::repeating(vec![
            peer("10.0.0.1"),
            peer("10.0.0.2").with_ready(false),
        ]));
        let (cycle, _transport) = cycle(&config, &directory);

        let report = cycle.run().await.unwrap();
        assert_eq!(report.added, vec![peer("10.0.0.1").key()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_peer_removed_silently() {
        let directory = Arc::new(ScriptedDirectory::new());
        directory.push_ok(vec![peer("10.0.0.1")]);
        directory.push_ok(vec![]);
        let (cycle, transport) = cycle(&config(), &directory);

        cycle.run().await.unwrap();
        cycle.scheduler().fail(&peer("10.0.0.1").key());
        let report = cycle.run().await.unwrap();

        assert_eq!(report.removed, vec![peer("10.0.0.1").key()]);
        assert_eq!(transport.removed_count(&peer("10.0.0.1").key()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_cycle_removes_restores_and_adds() {
        let config = config().with_min_connect_time(Duration::from_secs(60));
        let directory = Arc::new(ScriptedDirectory::new());
        directory.push_ok(vec![peer("10.0.0.1"), peer("10.0.0.2"), peer("10.0.0.3")]);
        directory.push_ok(vec![peer("10.0.0.2"), peer("10.0.0.3"), peer("10.0.0.4")]);
        let (cycle, transport) = cycle(&config, &directory);

        cycle.run().await.unwrap();
        cycle.scheduler().fail(&peer("10.0.0.2").key());
        let report = cycle.run().await.unwrap();

        assert_eq!(report.removed, vec![peer("10.0.0.1").key()]);
        assert_eq!(report.restored, vec![peer("10.0.0.2").key()]);
        assert_eq!(report.added, vec![peer("10.0.0.4").key()]);
        assert_eq!(transport.added_count(&peer("10.0.0.3").key()), 1);
        assert_eq!(cycle.registry().len(), 3);
    }

    #[test]
    fn test_expand_ports() {
        let expanded = expand_ports(vec![peer("10.0.0.1"), PeerRecord::new("10.0.0.2", 0)], 2);
        let keys: Vec<_> = expanded.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(
            keys,
            vec!["10.0.0.1:7800", "10.0.0.1:7801", "10.0.0.1:7802", "10.0.0.2"]
        );

        let edge = expand_ports(vec![PeerRecord::new("10.0.0.3", u16::MAX)], 3);
        assert_eq!(edge.len(), 1);
    }
}
