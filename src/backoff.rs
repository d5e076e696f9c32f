//! Reconnect backoff for failed peers.
//!
//! A peer reported failed leaves the active view and is re-announced by a
//! timer. Failures after a sustained connection count towards permanent
//! exclusion and retry after the peer's current delay, which doubles on
//! every reconnect up to a ceiling. Failures right after a reconnect are
//! flaps: they are not counted and retry after `min_connect_time`.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::membership::MembershipTransport;
use crate::peer::{PeerKey, PeerRecord};
use crate::registry::PeerRegistry;
use crate::stats::DiscoveryStats;

/// Timing rules for failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// A connection at least this old counts as sustained.
    pub min_connect_time: Duration,
    /// Delay given to newly tracked or reset peers.
    pub initial_reconnect_delay: Duration,
    /// Ceiling for the doubled delay.
    pub max_reconnect_delay: Duration,
    /// Counted failures before permanent exclusion; `0` never excludes.
    pub max_reconnect_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_connect_time: Duration::from_millis(1000),
            initial_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(16000),
            max_reconnect_attempts: 4,
        }
    }
}

impl BackoffPolicy {
    /// Whether a connection that lasted `connected_for` counts as sustained.
    pub fn is_sustained(&self, connected_for: Duration) -> bool {
        connected_for >= self.min_connect_time
    }

    /// Delay that follows `current` after a reconnect.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_reconnect_delay)
    }

    /// Delay after `reconnects` doublings of the initial delay.
    pub fn delay_after(&self, reconnects: u32) -> Duration {
        let multiplier = 1u32.checked_shl(reconnects).unwrap_or(u32::MAX);
        self.initial_reconnect_delay
            .saturating_mul(multiplier)
            .min(self.max_reconnect_delay)
    }

    /// Whether `failures` counted failures exclude a peer for good.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_reconnect_attempts > 0 && failures >= self.max_reconnect_attempts
    }
}

/// Result of [`BackoffScheduler::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The peer is not tracked.
    Untracked,
    /// The peer was already failed; nothing changed.
    AlreadyFailed,
    /// The peer left the view and will be re-announced after `delay`.
    Scheduled {
        /// Time until the reconnect attempt.
        delay: Duration,
        /// Whether this failure was counted.
        counted: bool,
        /// Counted failures so far.
        failures: u32,
    },
    /// The peer left the view and is permanently excluded.
    Excluded {
        /// Counted failures that led to exclusion.
        failures: u32,
    },
}

/// Result of [`BackoffScheduler::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The peer is not tracked.
    Untracked,
    /// A healthy peer was seen again; nothing changed.
    Steady,
    /// A healthy, sustained peer had its failure counters reset.
    Reset,
    /// A failed peer was re-announced ahead of its timer.
    Restored {
        /// Whether failure counters were reset as well.
        counters_reset: bool,
    },
}

struct Inner<T> {
    registry: Arc<PeerRegistry>,
    transport: Arc<T>,
    policy: BackoffPolicy,
    stats: Arc<DiscoveryStats>,
    runtime: Handle,
}

/// Drives the failed/reconnect state machine of tracked peers.
///
/// Timers run as tasks on the given runtime. Each one carries the epoch of
/// the slot at arming time, so a timer that was cancelled, superseded or
/// outlived its peer does nothing when it fires.
pub struct BackoffScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BackoffScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: MembershipTransport> BackoffScheduler<T> {
    /// Create a scheduler that arms its timers on `runtime`.
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<T>,
        policy: BackoffPolicy,
        stats: Arc<DiscoveryStats>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                transport,
                policy,
                stats,
                runtime,
            }),
        }
    }

    /// Timing rules in force.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.inner.policy
    }

    /// Report `key` as failed.
    ///
    /// Emits "peer removed" and either arms a reconnect timer or, once the
    /// counted failures reach the limit, excludes the peer permanently.
    pub fn fail(&self, key: &PeerKey) -> FailOutcome {
        let inner = &self.inner;
        let Some(slot) = inner.registry.slot(key) else {
            return FailOutcome::Untracked;
        };

        let outcome = {
            let mut guard = slot.lock();
            if guard.is_evicted() {
                return FailOutcome::Untracked;
            }
            if guard.peer.failed {
                return FailOutcome::AlreadyFailed;
            }

            let connected_for = Instant::now().saturating_duration_since(guard.peer.connect_time);
            let counted = inner.policy.is_sustained(connected_for);
            let delay = if counted {
                guard.peer.connect_failures += 1;
                guard.peer.reconnect_delay
            } else {
                inner.policy.min_connect_time
            };
            guard.peer.sustained_before_failure = counted;
            guard.peer.failed = true;
            let failures = guard.peer.connect_failures;

            inner.transport.on_peer_removed(key);
            inner.stats.record_removed();

            if inner.policy.is_exhausted(failures) {
                tracing::warn!(
                    peer = %key,
                    failures,
                    "peer failed too many times, excluding it"
                );
                inner.registry.exclude_locked(&mut guard);
                inner.stats.record_exclusion();
                FailOutcome::Excluded { failures }
            } else {
                tracing::debug!(
                    peer = %key,
                    counted,
                    failures,
                    delay = ?delay,
                    "peer failed, reconnect scheduled"
                );
                let epoch = guard.next_epoch();
                let scheduler = self.clone();
                let timer_key = key.clone();
                let task = inner.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    scheduler.reconnect(&timer_key, epoch);
                });
                guard.set_backoff(epoch, task.abort_handle());
                FailOutcome::Scheduled {
                    delay,
                    counted,
                    failures,
                }
            }
        };

        if matches!(outcome, FailOutcome::Excluded { .. }) {
            inner.registry.discard(key, &slot);
        }
        outcome
    }

    /// Fire the reconnect timer armed for `epoch`.
    ///
    /// Returns `true` if the peer was re-announced.
    pub(crate) fn reconnect(&self, key: &PeerKey, epoch: u64) -> bool {
        let inner = &self.inner;
        inner
            .registry
            .with_slot(key, |slot| {
                if !slot.claim_backoff(epoch) || !slot.peer.failed {
                    return false;
                }
                slot.peer.reconnect_delay = inner.policy.next_delay(slot.peer.reconnect_delay);
                slot.peer.connect_time = Instant::now();
                slot.peer.failed = false;

                tracing::info!(
                    peer = %key,
                    next_delay = ?slot.peer.reconnect_delay,
                    "reconnecting peer"
                );
                inner.transport.on_peer_added(&slot.peer.record);
                inner.stats.record_reconnect();
                true
            })
            .unwrap_or(false)
    }

    /// Record that the directory still lists `record`.
    ///
    /// A failed peer is re-announced at once and its timer cancelled. Its
    /// counters are reset only if it had been healthy for at least
    /// `min_connect_time` before failing. A healthy peer connected for that
    /// long has its counters reset silently.
    pub fn present(&self, record: PeerRecord) -> Presence {
        let inner = &self.inner;
        let key = record.key();
        inner
            .registry
            .with_slot(&key, |slot| {
                slot.peer.record = record;
                let now = Instant::now();

                if slot.peer.failed {
                    slot.cancel_backoff();
                    let counters_reset = slot.peer.sustained_before_failure;
                    if counters_reset {
                        slot.peer.connect_failures = 0;
                        slot.peer.reconnect_delay = inner.policy.initial_reconnect_delay;
                    }
                    slot.peer.failed = false;
                    slot.peer.connect_time = now;

                    tracing::debug!(peer = %key, counters_reset, "failed peer listed again");
                    inner.transport.on_peer_added(&slot.peer.record);
                    inner.stats.record_added();
                    return Presence::Restored { counters_reset };
                }

                let connected_for = now.saturating_duration_since(slot.peer.connect_time);
                if inner.policy.is_sustained(connected_for)
                    && (slot.peer.connect_failures > 0
                        || slot.peer.reconnect_delay != inner.policy.initial_reconnect_delay)
                {
                    slot.peer.connect_failures = 0;
                    slot.peer.reconnect_delay = inner.policy.initial_reconnect_delay;
                    return Presence::Reset;
                }
                Presence::Steady
            })
            .unwrap_or(Presence::Untracked)
    }
}
