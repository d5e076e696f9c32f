//! # peer-directory
//!
//! Directory-driven cluster peer discovery.
//!
//! A node periodically asks an external directory (DNS, a Kubernetes pod
//! list, a static list) which peers exist, reconciles the answer against
//! the peers it already tracks and reports every change to the cluster's
//! membership transport. Lookup failures are retried and then tolerated;
//! peers that keep failing are backed off exponentially and eventually
//! excluded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Membership transport                         │
//! │             (on_peer_added / on_peer_removed)                   │
//! └────────────────────────────▲────────────────────────────────────┘
//!                              │ notifications
//! ┌────────────────────────────┴────────────────────────────────────┐
//! │                         Discovery                               │
//! │        (poll task, lifecycle, external failure signals)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    ReconciliationCycle                          │
//! │     (resolve, partition, filter, diff, apply)                   │
//! ├──────────────┬──────────────────┬───────────────┬───────────────┤
//! │ RetryExecutor│ RollingUpdate    │ PeerRegistry  │ Backoff       │
//! │ (attempts)   │ Partitioner      │ (per-peer     │ Scheduler     │
//! │              │ (group keys)     │  slots)       │ (timers)      │
//! └──────┬───────┴──────────────────┴───────────────┴───────────────┘
//!        │ list_peers()
//! ┌──────▼──────────────────────────────────────────────────────────┐
//! │             DirectoryClient (DNS, pods, static)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## API Entry Points
//!
//! | API | Use Case |
//! |-----|----------|
//! | [`Discovery`] | Production - periodic polling with backoff and shutdown |
//! | [`ReconciliationCycle`] | Drive cycles from your own scheduler |
//! | [`DirectoryClient`] | Plug in a new directory |
//! | [`MembershipTransport`] | Receive membership changes |
//!
//! ## Example
//!
//! ```
//! use peer_directory::{
//!     Discovery, DiscoveryConfig, DiscoveryHandle, MembershipEvent, PeerRecord, StaticDirectory,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let directory = StaticDirectory::new([
//!     PeerRecord::new("10.0.0.1", 7800),
//!     PeerRecord::new("10.0.0.2", 7800),
//! ]);
//! let config = DiscoveryConfig::new().with_local_address("10.0.0.1".parse().unwrap());
//!
//! let (discovery, events) = Discovery::start_with_events(config, directory).unwrap();
//! match events.recv().await.unwrap() {
//!     MembershipEvent::PeerAdded(peer) => assert_eq!(peer.address, "10.0.0.2"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! discovery.stop();
//! # });
//! ```
//!
//! ## Features
//!
//! - `kube` (default): Kubernetes pod-list decoding and query paths
//! - `dns-srv` (default): service ports and targets from DNS SRV records
//! - `serde`: serialization of configuration and peer records
//! - `metrics`: counters and gauges through the `metrics` facade

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]

mod backoff;
mod config;
pub mod directory;
mod engine;
mod error;
mod membership;
mod partition;
mod peer;
mod reconcile;
mod registry;
mod retry;
mod stats;
pub mod testing;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

pub use backoff::{BackoffPolicy, BackoffScheduler, FailOutcome, Presence};
pub use config::DiscoveryConfig;
pub use directory::{DirectoryClient, DnsDirectory, Selector, StaticDirectory};
#[cfg(feature = "kube")]
#[cfg_attr(docsrs, doc(cfg(feature = "kube")))]
pub use directory::{decode_pod_list, PodDecodeOptions, PodQuery};
pub use engine::{Discovery, DiscoveryHandle};
pub use error::{Error, Result};
pub use membership::{ChannelTransport, MembershipEvent, MembershipTransport, NoopTransport};
pub use partition::{PartitionOutcome, RollingUpdatePartitioner};
pub use peer::{PeerKey, PeerRecord};
pub use reconcile::{expand_ports, CycleReport, ReconciliationCycle};
pub use registry::{PeerRegistry, TrackedPeer, Upsert};
pub use retry::RetryExecutor;
pub use stats::{DiscoveryStats, StatsSnapshot};
