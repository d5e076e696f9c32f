//! Rolling-update partitioning.
//!
//! During a rolling update two deployment generations run side by side.
//! When partitioning is enabled each node only sees peers of its own
//! generation, identified by the group key of the candidate that carries
//! the node's own address.

use std::net::IpAddr;

use crate::peer::PeerRecord;

/// Result of [`RollingUpdatePartitioner::partition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Partitioning is switched off; candidates pass unchanged.
    Disabled,
    /// Candidates were narrowed to the local group.
    Partitioned {
        /// Group key of the local node.
        group: String,
        /// Candidates kept.
        kept: usize,
        /// Candidates dropped.
        dropped: usize,
    },
    /// The local group could not be determined; candidates pass unchanged.
    Unidentified(&'static str),
}

/// Restricts candidates to the local node's deployment generation.
#[derive(Debug, Clone, Default)]
pub struct RollingUpdatePartitioner {
    enabled: bool,
    local_address: Option<IpAddr>,
}

impl RollingUpdatePartitioner {
    /// Create a partitioner. Without a local address it always fails open.
    pub fn new(enabled: bool, local_address: Option<IpAddr>) -> Self {
        Self {
            enabled,
            local_address,
        }
    }

    /// Whether partitioning is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Narrow `candidates` in place to the local group.
    ///
    /// Fails open: when the local candidate is missing or has no group
    /// key, a warning is logged and every candidate is kept.
    pub fn partition(&self, candidates: &mut Vec<PeerRecord>) -> PartitionOutcome {
        if !self.enabled {
            return PartitionOutcome::Disabled;
        }

        let group = match self.local_group(candidates) {
            Ok(group) => group,
            Err(reason) => {
                tracing::warn!(
                    reason,
                    "rolling update partitioning is enabled but the local node's group is unknown, \
                     all peers will be placed in the same cluster"
                );
                return PartitionOutcome::Unidentified(reason);
            }
        };

        let before = candidates.len();
        candidates.retain(|c| c.group_key.as_deref() == Some(group.as_str()));
        let kept = candidates.len();
        tracing::debug!(group = %group, kept, dropped = before - kept, "partitioned candidates");

        PartitionOutcome::Partitioned {
            group,
            kept,
            dropped: before - kept,
        }
    }

    fn local_group(&self, candidates: &[PeerRecord]) -> Result<String, &'static str> {
        let local = self.local_address.ok_or("local address not configured")?;
        let own = candidates
            .iter()
            .find(|c| c.matches_address(&local))
            .ok_or("local address not among candidates")?;
        own.group_key.clone().ok_or("local candidate has no group key")
    }
}
