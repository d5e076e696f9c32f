//! Authoritative in-memory membership state.
//!
//! The registry maps each [`PeerKey`] to its own lock-protected slot. The map
//! lock is only held long enough to find, insert or detach a slot, so a
//! snapshot or a long-running notification for one peer never stalls updates
//! to another.
//!
//! Eviction marks the detached slot as evicted and aborts its pending
//! reconnect timer. Every transition checks that mark under the slot lock,
//! which makes late timers and racing cycles harmless no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::peer::{PeerKey, PeerRecord};

/// Membership state of a peer, as seen through the registry.
///
/// Values handed out by the registry are copies; mutating the live state
/// is only possible through registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPeer {
    pub(crate) key: PeerKey,
    pub(crate) record: PeerRecord,
    pub(crate) failed: bool,
    pub(crate) connect_failures: u32,
    pub(crate) reconnect_delay: Duration,
    pub(crate) connect_time: Instant,
    pub(crate) sustained_before_failure: bool,
    pub(crate) reconnect_pending: bool,
}

impl TrackedPeer {
    fn new(record: PeerRecord, reconnect_delay: Duration, now: Instant) -> Self {
        Self {
            key: record.key(),
            record,
            failed: false,
            connect_failures: 0,
            reconnect_delay,
            connect_time: now,
            sustained_before_failure: false,
            reconnect_pending: false,
        }
    }

    /// Peer identity.
    pub fn key(&self) -> &PeerKey {
        &self.key
    }

    /// Latest directory record for this peer.
    pub fn record(&self) -> &PeerRecord {
        &self.record
    }

    /// Whether the peer is currently out of the active view.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Failures counted towards permanent exclusion.
    pub fn connect_failures(&self) -> u32 {
        self.connect_failures
    }

    /// Delay applied to the next counted failure.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// When the peer was last (re)announced.
    pub fn connect_time(&self) -> Instant {
        self.connect_time
    }

    /// Whether a reconnect timer is armed for this peer.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }
}

/// Live state of one peer plus its timer bookkeeping.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) peer: TrackedPeer,
    backoff: Option<AbortHandle>,
    epoch: u64,
    evicted: bool,
}

impl Slot {
    fn new(peer: TrackedPeer) -> Self {
        Self {
            peer,
            backoff: None,
            epoch: 0,
            evicted: false,
        }
    }

    /// Arm a new reconnect timer, returning the epoch the timer must present.
    pub(crate) fn next_epoch(&mut self) -> u64 {
        self.cancel_backoff();
        self.epoch += 1;
        self.epoch
    }

    /// Store the abort handle of the timer armed for `epoch`.
    pub(crate) fn set_backoff(&mut self, epoch: u64, handle: AbortHandle) {
        if self.epoch == epoch && !self.evicted {
            self.backoff = Some(handle);
            self.peer.reconnect_pending = true;
        } else {
            handle.abort();
        }
    }

    /// Claim the timer for `epoch`. Fails if it was cancelled or superseded.
    pub(crate) fn claim_backoff(&mut self, epoch: u64) -> bool {
        if self.evicted || self.epoch != epoch || !self.peer.reconnect_pending {
            return false;
        }
        self.backoff = None;
        self.peer.reconnect_pending = false;
        true
    }

    /// Cancel any pending reconnect timer.
    pub(crate) fn cancel_backoff(&mut self) {
        if let Some(handle) = self.backoff.take() {
            handle.abort();
        }
        self.peer.reconnect_pending = false;
        self.epoch += 1;
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted
    }

    fn evict(&mut self) {
        self.cancel_backoff();
        self.evicted = true;
    }
}

/// Result of [`PeerRegistry::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// The peer was not tracked and has been created.
    Inserted(TrackedPeer),
    /// The peer was already tracked; its record was refreshed.
    Updated(TrackedPeer),
    /// The peer is permanently excluded and was not tracked.
    Excluded,
    /// The registry has been closed.
    Closed,
}

/// Authoritative map from peer key to tracked state.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerKey, Arc<Mutex<Slot>>>>,
    excluded: RwLock<HashSet<PeerKey>>,
    initial_reconnect_delay: Duration,
    closed: AtomicBool,
}

impl PeerRegistry {
    /// Create an empty registry whose new peers start at `initial_reconnect_delay`.
    pub fn new(initial_reconnect_delay: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            excluded: RwLock::new(HashSet::new()),
            initial_reconnect_delay,
            closed: AtomicBool::new(false),
        }
    }

    /// Delay given to newly tracked peers.
    pub fn initial_reconnect_delay(&self) -> Duration {
        self.initial_reconnect_delay
    }

    /// Track `record`, or refresh the record of an already tracked peer.
    ///
    /// Refreshing never touches failure or backoff state.
    pub fn upsert(&self, record: PeerRecord) -> Upsert {
        let key = record.key();
        let slot = {
            let mut peers = self.peers.write();
            if self.closed.load(Ordering::Acquire) {
                return Upsert::Closed;
            }
            if self.excluded.read().contains(&key) {
                return Upsert::Excluded;
            }
            match peers.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    let peer =
                        TrackedPeer::new(record, self.initial_reconnect_delay, Instant::now());
                    peers.insert(key, Arc::new(Mutex::new(Slot::new(peer.clone()))));
                    return Upsert::Inserted(peer);
                }
            }
        };

        let mut slot = slot.lock();
        if slot.evicted {
            return Upsert::Closed;
        }
        slot.peer.record = record;
        Upsert::Updated(slot.peer.clone())
    }

    /// Copy of the tracked state for `key`.
    pub fn get(&self, key: &PeerKey) -> Option<TrackedPeer> {
        self.with_slot(key, |slot| slot.peer.clone())
    }

    /// Whether `key` is tracked.
    pub fn contains(&self, key: &PeerKey) -> bool {
        self.peers.read().contains_key(key)
    }

    /// Stop tracking `key`, cancelling any pending reconnect.
    pub fn remove(&self, key: &PeerKey) -> Option<TrackedPeer> {
        self.remove_with(key, |peer| peer.clone())
    }

    /// Stop tracking `key` and run `f` on its final state under the peer lock.
    ///
    /// Nothing else can observe or mutate the peer while `f` runs, so a
    /// notification issued from `f` can never be followed by a stale one
    /// for the same peer.
    pub(crate) fn remove_with<R>(
        &self,
        key: &PeerKey,
        f: impl FnOnce(&TrackedPeer) -> R,
    ) -> Option<R> {
        let slot = self.peers.write().remove(key)?;
        let mut slot = slot.lock();
        if slot.evicted {
            return None;
        }
        slot.evict();
        Some(f(&slot.peer))
    }

    /// Shared handle to the slot of `key`.
    pub(crate) fn slot(&self, key: &PeerKey) -> Option<Arc<Mutex<Slot>>> {
        self.peers.read().get(key).cloned()
    }

    /// Run `f` on the live slot of `key` unless it has been evicted.
    pub(crate) fn with_slot<R>(&self, key: &PeerKey, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let slot = self.slot(key)?;
        let mut slot = slot.lock();
        if slot.evicted {
            return None;
        }
        Some(f(&mut slot))
    }

    /// Permanently exclude the peer held by `slot`.
    ///
    /// The slot is evicted immediately; its map entry is detached by
    /// [`discard`](Self::discard) once the caller has released the slot lock.
    pub(crate) fn exclude_locked(&self, slot: &mut Slot) {
        self.excluded.write().insert(slot.peer.key.clone());
        slot.evict();
    }

    /// Detach the map entry for `key` if it still refers to `slot`.
    pub(crate) fn discard(&self, key: &PeerKey, slot: &Arc<Mutex<Slot>>) {
        let mut peers = self.peers.write();
        if peers.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            peers.remove(key);
        }
    }

    /// Point-in-time copy of every tracked peer, ordered by key.
    pub fn snapshot(&self) -> Vec<TrackedPeer> {
        let slots: Vec<_> = self.peers.read().values().cloned().collect();
        let mut peers: Vec<TrackedPeer> = slots
            .iter()
            .filter_map(|slot| {
                let slot = slot.lock();
                (!slot.evicted).then(|| slot.peer.clone())
            })
            .collect();
        peers.sort_by(|a, b| a.key.cmp(&b.key));
        peers
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether no peer is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` has been permanently excluded.
    pub fn is_excluded(&self, key: &PeerKey) -> bool {
        self.excluded.read().contains(key)
    }

    /// Permanently excluded peers, ordered by key.
    pub fn excluded(&self) -> Vec<PeerKey> {
        let mut keys: Vec<_> = self.excluded.read().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Lift a permanent exclusion. Returns `true` if `key` was excluded.
    pub fn readmit(&self, key: &PeerKey) -> bool {
        self.excluded.write().remove(key)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Evict every peer and cancel every pending timer.
    ///
    /// After this returns no transition will run and no new peer is accepted.
    pub fn close(&self) {
        let slots: Vec<_> = {
            let mut peers = self.peers.write();
            self.closed.store(true, Ordering::Release);
            peers.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            slot.lock().evict();
        }
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}
