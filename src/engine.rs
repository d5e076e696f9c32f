//! Discovery lifecycle.
//!
//! [`Discovery::start`] validates the configuration, spawns the poll task
//! on the current tokio runtime and returns the running instance. The poll
//! task runs a reconciliation cycle right away (or after `initial_delay`)
//! and then every `query_interval`; ticks missed while a cycle runs are
//! skipped.
//!
//! Stopping closes the shutdown signal, aborts the poll task and evicts
//! every tracked peer. No notification is issued once [`stop`] returns.
//!
//! [`stop`]: DiscoveryHandle::stop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backoff::FailOutcome;
use crate::config::DiscoveryConfig;
use crate::directory::DirectoryClient;
use crate::error::{Error, Result};
use crate::membership::{ChannelTransport, MembershipEvent, MembershipTransport};
use crate::peer::PeerKey;
use crate::reconcile::{CycleReport, ReconciliationCycle};
use crate::registry::{PeerRegistry, TrackedPeer};
use crate::stats::{DiscoveryStats, StatsSnapshot};

/// Control over a running discovery process.
pub trait DiscoveryHandle: Send + Sync {
    /// Check if the discovery process is still running.
    fn is_running(&self) -> bool;

    /// Stop the discovery process.
    fn stop(&self);
}

struct Shared<D, T> {
    config: DiscoveryConfig,
    cycle: ReconciliationCycle<D, T>,
    registry: Arc<PeerRegistry>,
    stats: Arc<DiscoveryStats>,
    shutdown_tx: async_channel::Sender<()>,
    shutdown_rx: async_channel::Receiver<()>,
    running: AtomicBool,
}

/// A running discovery instance.
///
/// Dropping it stops discovery.
///
/// # Example
///
/// ```
/// use peer_directory::{Discovery, DiscoveryConfig, DiscoveryHandle, PeerRecord, StaticDirectory};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let directory = StaticDirectory::new([PeerRecord::new("10.0.0.2", 7800)]);
/// let config = DiscoveryConfig::new().with_local_address("10.0.0.1".parse().unwrap());
///
/// let (discovery, events) = Discovery::start_with_events(config, directory).unwrap();
/// let report = discovery.poll_now().await.unwrap();
/// assert!(report.resolved);
///
/// discovery.stop();
/// assert!(!discovery.is_running());
/// # drop(events);
/// # });
/// ```
pub struct Discovery<D, T> {
    shared: Arc<Shared<D, T>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl<D, T> Discovery<D, T>
where
    D: DirectoryClient,
    T: MembershipTransport,
{
    /// Start discovery on the current tokio runtime.
    ///
    /// Fails with [`Error::Config`] for an invalid configuration or a
    /// selector the directory cannot answer, and with [`Error::Runtime`]
    /// when called outside a runtime.
    pub fn start(config: DiscoveryConfig, directory: D, transport: T) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        Self::start_on(config, directory, transport, runtime)
    }

    /// Start discovery on `runtime`.
    pub fn start_on(
        config: DiscoveryConfig,
        directory: D,
        transport: T,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        if !directory.supports(&config.selector) {
            return Err(Error::Config(format!(
                "{} directory cannot resolve {}",
                directory.describe(),
                config.selector
            )));
        }

        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        let registry = Arc::new(PeerRegistry::new(config.initial_reconnect_delay));
        let stats = Arc::new(DiscoveryStats::new());
        let directory = Arc::new(directory);
        let describe = directory.describe();
        let cycle = ReconciliationCycle::new(
            &config,
            directory,
            Arc::new(transport),
            registry.clone(),
            stats.clone(),
            runtime.clone(),
            Some(shutdown_rx.clone()),
        );

        let shared = Arc::new(Shared {
            config,
            cycle,
            registry,
            stats,
            shutdown_tx,
            shutdown_rx,
            running: AtomicBool::new(true),
        });

        tracing::info!(
            directory = %describe,
            selector = %shared.config.selector,
            interval = ?shared.config.query_interval,
            "peer discovery started"
        );

        let task = runtime.spawn(Self::poll_loop(shared.clone()));
        Ok(Self {
            shared,
            poll_task: Mutex::new(Some(task)),
        })
    }

    async fn poll_loop(shared: Arc<Shared<D, T>>) {
        let config = &shared.config;

        if !config.initial_delay.is_zero() {
            let delay = tokio::time::sleep(config.initial_delay).fuse();
            let shutdown = shared.shutdown_rx.recv().fuse();
            futures::pin_mut!(delay, shutdown);
            futures::select! {
                _ = delay => {}
                _ = shutdown => return,
            }
        }

        let mut interval = tokio::time::interval(config.query_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            {
                let tick = interval.tick().fuse();
                let shutdown = shared.shutdown_rx.recv().fuse();
                futures::pin_mut!(tick, shutdown);
                futures::select! {
                    _ = tick => {}
                    _ = shutdown => break,
                }
            }

            match shared.cycle.run().await {
                Ok(report) if report.is_noop() => {
                    tracing::trace!(candidates = report.candidates, "reconciliation cycle done");
                }
                Ok(report) => {
                    tracing::debug!(
                        candidates = report.candidates,
                        added = report.added.len(),
                        removed = report.removed.len(),
                        restored = report.restored.len(),
                        "reconciliation cycle done"
                    );
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!(error = %e, "reconciliation cycle failed");
                }
            }
        }

        tracing::debug!("poll task exited");
    }

    /// Run a reconciliation cycle now, outside the regular schedule.
    pub async fn poll_now(&self) -> Result<CycleReport> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }
        self.shared.cycle.run().await
    }

    /// Report a transport-level failure of `key`.
    pub fn peer_failed(&self, key: &PeerKey) -> FailOutcome {
        self.shared.cycle.scheduler().fail(key)
    }

    /// Lift the permanent exclusion of `key`. It is tracked again on the next cycle.
    pub fn readmit(&self, key: &PeerKey) -> bool {
        let readmitted = self.shared.registry.readmit(key);
        if readmitted {
            tracing::info!(peer = %key, "excluded peer readmitted");
        }
        readmitted
    }

    /// Point-in-time copy of every tracked peer, ordered by key.
    pub fn snapshot(&self) -> Vec<TrackedPeer> {
        self.shared.registry.snapshot()
    }

    /// Permanently excluded peers, ordered by key.
    pub fn excluded(&self) -> Vec<PeerKey> {
        self.shared.registry.excluded()
    }

    /// Counter values so far.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Configuration in force.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.shared.config
    }

    /// Stop discovery and wait for the poll task to exit.
    pub async fn shutdown(&self) {
        let task = self.halt();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "poll task ended abnormally");
                }
            }
        }
    }

    fn halt(&self) -> Option<JoinHandle<()>> {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.shared.shutdown_tx.close();
        let task = self.poll_task.lock().take();
        if let Some(task) = task.as_ref() {
            task.abort();
        }
        self.shared.registry.close();
        if was_running {
            tracing::info!("peer discovery stopped");
        }
        task
    }
}

impl<D: DirectoryClient> Discovery<D, ChannelTransport> {
    /// Start discovery and receive membership changes through a channel.
    pub fn start_with_events(
        config: DiscoveryConfig,
        directory: D,
    ) -> Result<(Self, async_channel::Receiver<MembershipEvent>)> {
        let (transport, events) = ChannelTransport::new();
        let discovery = Self::start(config, directory, transport)?;
        Ok((discovery, events))
    }
}

impl<D, T> DiscoveryHandle for Discovery<D, T>
where
    D: DirectoryClient,
    T: MembershipTransport,
{
    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.halt();
    }
}

impl<D, T> Drop for Discovery<D, T> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.shutdown_tx.close();
        if let Some(task) = self.poll_task.get_mut().take() {
            task.abort();
        }
        self.shared.registry.close();
    }
}

impl<D, T> std::fmt::Debug for Discovery<D, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("running", &self.shared.running.load(Ordering::Acquire))
            .field("tracked", &self.shared.registry.len())
            .finish()
    }
}
