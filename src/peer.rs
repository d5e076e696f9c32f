//! Peer identity and directory records.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Stable identity of a peer, rendered as `ip[:port]`.
///
/// Two directory entries that produce the same key are the same peer,
/// whatever their other fields say.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PeerKey(Arc<str>);

impl PeerKey {
    /// Build a key from an address and port.
    ///
    /// A port of `0` yields the bare address. IPv6 literals are bracketed.
    pub fn new(address: &str, port: u16) -> Self {
        let key = if port == 0 {
            address.to_string()
        } else if address.contains(':') && !address.starts_with('[') {
            format!("[{}]:{}", address, port)
        } else {
            format!("{}:{}", address, port)
        };
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for PeerKey {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

/// A peer as reported by the directory.
///
/// This is plain data; all mutable membership state lives in
/// [`TrackedPeer`](crate::TrackedPeer) inside the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerRecord {
    /// Host address (usually an IP literal).
    pub address: String,
    /// Service port.
    pub port: u16,
    /// Deployment generation this peer belongs to, if the directory knows it.
    pub group_key: Option<String>,
    /// Directory-reported readiness. Directories without readiness report `true`.
    pub ready: bool,
}

impl PeerRecord {
    /// Create a ready record with no group key.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            group_key: None,
            ready: true,
        }
    }

    /// Set the group key (builder pattern).
    pub fn with_group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    /// Set readiness (builder pattern).
    pub const fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// The identity of this record.
    pub fn key(&self) -> PeerKey {
        PeerKey::new(&self.address, self.port)
    }

    /// Whether this record points at the given host address.
    ///
    /// Compares parsed IPs when the record address is an IP literal so that
    /// equivalent spellings (e.g. compressed IPv6) still match.
    pub fn matches_address(&self, addr: &IpAddr) -> bool {
        match self.address.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            Ok(ip) => ip == *addr,
            Err(_) => self.address == addr.to_string(),
        }
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())?;
        if let Some(group) = &self.group_key {
            write!(f, " (group {})", group)?;
        }
        if !self.ready {
            write!(f, " [not ready]")?;
        }
        Ok(())
    }
}
