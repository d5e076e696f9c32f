//! Peer directories.
//!
//! A directory answers one question: which peers exist right now? The
//! engine polls it through [`DirectoryClient`] and reconciles the answer
//! against what it already tracks.
//!
//! # Directory Types
//!
//! - [`StaticDirectory`]: a fixed list, replaceable at runtime
//! - [`DnsDirectory`]: SRV records of a service name, falling back to its
//!   A/AAAA records (SRV requires `dns-srv` feature)
//! - [`decode_pod_list`]: turns a Kubernetes `PodList` body into records
//!   for a caller-supplied HTTP client (requires `kube` feature)
//!
//! # Example
//!
//! ```
//! use peer_directory::{DirectoryClient, PeerRecord, Selector, StaticDirectory};
//!
//! # tokio_test_block_on(async {
//! let directory = StaticDirectory::new([PeerRecord::new("10.0.0.1", 7800)]);
//! let peers = directory.list_peers(&Selector::default()).await.unwrap();
//! assert_eq!(peers.len(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod dns;
#[cfg(feature = "kube")]
mod pods;
mod r#static;
mod traits;

pub use dns::DnsDirectory;
#[cfg(feature = "kube")]
pub use pods::{decode_pod_list, PodDecodeOptions, PodQuery, GROUP_LABELS};
pub use r#static::StaticDirectory;
pub use traits::{DirectoryClient, Selector};
