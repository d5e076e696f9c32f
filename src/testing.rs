//! Test doubles for the directory and transport boundaries.
//!
//! ## Features
//!
//! - **Scripted answers**: [`ScriptedDirectory`] replays a queue of results,
//!   then falls back to a fixed answer, and counts every call
//! - **Injected latency**: directory answers can be delayed to exercise
//!   attempt timeouts
//! - **Recorded notifications**: [`RecordingTransport`] keeps every
//!   membership change in order and can replay them into the active view
//!
//! ## Example
//!
//! ```
//! use peer_directory::testing::{RecordingTransport, ScriptedDirectory};
//! use peer_directory::PeerRecord;
//!
//! let directory = ScriptedDirectory::new();
//! directory.push_ok(vec![PeerRecord::new("10.0.0.1", 7800)]);
//! directory.push_err("connection refused");
//!
//! let transport = RecordingTransport::new();
//! assert!(transport.calls().is_empty());
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::directory::{DirectoryClient, Selector};
use crate::error::{Error, Result};
use crate::membership::MembershipTransport;
use crate::peer::{PeerKey, PeerRecord};

type Answer = std::result::Result<Vec<PeerRecord>, String>;

/// Directory that replays scripted answers.
#[derive(Debug, Default)]
pub struct ScriptedDirectory {
    script: Mutex<VecDeque<Answer>>,
    fallback: Mutex<Option<Answer>>,
    latency: Mutex<Duration>,
    calls: AtomicU64,
}

impl ScriptedDirectory {
    /// Directory with an empty script and no fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that always answers `records`.
    pub fn repeating(records: Vec<PeerRecord>) -> Self {
        let directory = Self::new();
        directory.set_fallback(Ok(records));
        directory
    }

    /// Queue a successful answer.
    pub fn push_ok(&self, records: Vec<PeerRecord>) {
        self.script.lock().push_back(Ok(records));
    }

    /// Queue a failed answer.
    pub fn push_err(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    /// Answer given once the script is exhausted.
    pub fn set_fallback(&self, answer: std::result::Result<Vec<PeerRecord>, String>) {
        *self.fallback.lock() = Some(answer);
    }

    /// Fail every call once the script is exhausted.
    pub fn set_outage(&self, message: impl Into<String>) {
        self.set_fallback(Err(message.into()));
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of `list_peers` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Scripted answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }

    fn next_answer(&self) -> Answer {
        if let Some(answer) = self.script.lock().pop_front() {
            return answer;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

impl DirectoryClient for ScriptedDirectory {
    async fn list_peers(&self, _selector: &Selector) -> Result<Vec<PeerRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.next_answer().map_err(Error::Directory)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// One notification received by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportCall {
    /// `on_peer_added` for this key.
    Added(PeerKey),
    /// `on_peer_removed` for this key.
    Removed(PeerKey),
}

/// Transport that records every notification in order.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    records: Mutex<Vec<PeerRecord>>,
}

impl RecordingTransport {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification so far, oldest first.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Records passed to `on_peer_added`, oldest first.
    pub fn added_records(&self) -> Vec<PeerRecord> {
        self.records.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.calls.lock().clear();
        self.records.lock().clear();
    }

    /// Number of "added" notifications for `key`.
    pub fn added_count(&self, key: &PeerKey) -> usize {
        self.count(|call| matches!(call, TransportCall::Added(k) if k == key))
    }

    /// Number of "removed" notifications for `key`.
    pub fn removed_count(&self, key: &PeerKey) -> usize {
        self.count(|call| matches!(call, TransportCall::Removed(k) if k == key))
    }

    /// Keys in the active view after replaying every notification.
    pub fn active(&self) -> BTreeSet<PeerKey> {
        let mut active = BTreeSet::new();
        for call in self.calls.lock().iter() {
            match call {
                TransportCall::Added(key) => {
                    active.insert(key.clone());
                }
                TransportCall::Removed(key) => {
                    active.remove(key);
                }
            }
        }
        active
    }

    fn count(&self, f: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| f(call)).count()
    }
}

impl MembershipTransport for RecordingTransport {
    fn on_peer_added(&self, peer: &PeerRecord) {
        self.calls.lock().push(TransportCall::Added(peer.key()));
        self.records.lock().push(peer.clone());
    }

    fn on_peer_removed(&self, key: &PeerKey) {
        self.calls.lock().push(TransportCall::Removed(key.clone()));
    }
}
