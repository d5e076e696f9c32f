//! Fixed peer list.

use parking_lot::RwLock;

use super::traits::{DirectoryClient, Selector};
use crate::error::Result;
use crate::peer::PeerRecord;

/// Directory backed by an in-memory list.
///
/// The selector is ignored. The list can be replaced at runtime, which
/// makes this directory handy for seeds and for operators who push
/// membership from elsewhere.
///
/// # Example
///
/// ```
/// use peer_directory::{PeerRecord, StaticDirectory};
///
/// let directory = StaticDirectory::new([
///     PeerRecord::new("10.0.0.1", 7800),
///     PeerRecord::new("10.0.0.2", 7800),
/// ]);
/// assert_eq!(directory.records().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct StaticDirectory {
    records: RwLock<Vec<PeerRecord>>,
}

impl StaticDirectory {
    /// Create a directory listing `records`.
    pub fn new(records: impl IntoIterator<Item = PeerRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }

    /// Replace the listed records.
    pub fn set(&self, records: impl IntoIterator<Item = PeerRecord>) {
        *self.records.write() = records.into_iter().collect();
    }

    /// Add one record.
    pub fn push(&self, record: PeerRecord) {
        self.records.write().push(record);
    }

    /// Remove every record with the given address. Returns how many were removed.
    pub fn remove_address(&self, address: &str) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.address != address);
        before - records.len()
    }

    /// Currently listed records.
    pub fn records(&self) -> Vec<PeerRecord> {
        self.records.read().clone()
    }
}

impl DirectoryClient for StaticDirectory {
    async fn list_peers(&self, _selector: &Selector) -> Result<Vec<PeerRecord>> {
        Ok(self.records())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_current_records() {
        let directory = StaticDirectory::new([PeerRecord::new("10.0.0.1", 7800)]);
        directory.push(PeerRecord::new("10.0.0.2", 7800));

        let peers = directory.list_peers(&Selector::default()).await.unwrap();
        assert_eq!(peers.len(), 2);

        assert_eq!(directory.remove_address("10.0.0.1"), 1);
        let peers = directory.list_peers(&Selector::default()).await.unwrap();
        assert_eq!(peers, vec![PeerRecord::new("10.0.0.2", 7800)]);

        directory.set(Vec::new());
        assert!(directory.records().is_empty());
    }
}
