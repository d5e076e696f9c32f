//! DNS-backed directory.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
#[cfg(feature = "dns-srv")]
use std::sync::Arc;

#[cfg(feature = "dns-srv")]
use trust_dns_resolver::TokioAsyncResolver;

use super::traits::{DirectoryClient, Selector};
use crate::error::{Error, Result};
use crate::peer::PeerRecord;

/// Resolves a service name to peers through DNS.
///
/// With the `dns-srv` feature the service's SRV records are asked first:
/// each target is resolved and announced on the port its record names. A
/// service without SRV records (or a failed SRV query) falls back to the
/// A/AAAA records of the name itself, announced on the configured port.
///
/// Duplicate endpoints are collapsed and the result is ordered, so two
/// lookups of an unchanged service return identical lists.
#[derive(Clone)]
pub struct DnsDirectory {
    port: u16,
    #[cfg(feature = "dns-srv")]
    resolver: Option<Arc<TokioAsyncResolver>>,
}

impl DnsDirectory {
    /// Create a directory with `port` as the fallback service port.
    ///
    /// SRV lookups use the system resolver configuration. When it cannot
    /// be loaded only A/AAAA lookups are made.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            #[cfg(feature = "dns-srv")]
            resolver: match TokioAsyncResolver::tokio_from_system_conf() {
                Ok(resolver) => Some(Arc::new(resolver)),
                Err(e) => {
                    tracing::warn!(error = %e, "no system resolver configuration, SRV lookups disabled");
                    None
                }
            },
        }
    }

    /// Create a directory that skips SRV lookups and announces every
    /// address on `port`.
    pub const fn a_records(port: u16) -> Self {
        Self {
            port,
            #[cfg(feature = "dns-srv")]
            resolver: None,
        }
    }

    /// Port given to peers without an SRV record.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether SRV records are consulted.
    pub fn uses_srv(&self) -> bool {
        #[cfg(feature = "dns-srv")]
        {
            self.resolver.is_some()
        }
        #[cfg(not(feature = "dns-srv"))]
        {
            false
        }
    }

    fn records(&self, endpoints: impl IntoIterator<Item = (IpAddr, u16)>) -> Vec<PeerRecord> {
        endpoints
            .into_iter()
            .map(|(ip, port)| (ip, if port == 0 { self.port } else { port }))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|(ip, port)| PeerRecord::new(ip.to_string(), port))
            .collect()
    }

    /// Records from an SRV answer, or `None` when the A/AAAA fallback applies.
    #[cfg_attr(not(feature = "dns-srv"), allow(dead_code))]
    fn srv_records(&self, name: &str, answer: Result<Vec<(IpAddr, u16)>>) -> Option<Vec<PeerRecord>> {
        match answer {
            Ok(endpoints) if !endpoints.is_empty() => Some(self.records(endpoints)),
            Ok(_) => {
                tracing::debug!(service = %name, port = self.port, "no SRV records, using service port");
                None
            }
            Err(e) => {
                tracing::debug!(service = %name, port = self.port, error = %e, "SRV lookup failed, using service port");
                None
            }
        }
    }

    #[cfg(feature = "dns-srv")]
    async fn lookup_srv(&self, resolver: &TokioAsyncResolver, name: &str) -> Result<Vec<(IpAddr, u16)>> {
        let answer = resolver
            .srv_lookup(name)
            .await
            .map_err(|e| Error::Directory(format!("SRV lookup of {name} failed: {e}")))?;

        let mut endpoints = Vec::new();
        for srv in answer.iter() {
            let target = srv.target().to_utf8();
            let ips = resolver
                .lookup_ip(target.as_str())
                .await
                .map_err(|e| Error::Directory(format!("failed to resolve SRV target {target}: {e}")))?;
            endpoints.extend(ips.iter().map(|ip| (ip, srv.port())));
        }
        Ok(endpoints)
    }

    async fn lookup_host(&self, name: &str) -> Result<Vec<PeerRecord>> {
        let addrs = tokio::net::lookup_host((name, self.port))
            .await
            .map_err(|e| Error::Directory(format!("failed to resolve {name}: {e}")))?;
        Ok(self.records(addrs.map(|addr| (addr.ip(), self.port))))
    }
}

impl fmt::Debug for DnsDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsDirectory")
            .field("port", &self.port)
            .field("srv", &self.uses_srv())
            .finish()
    }
}

impl DirectoryClient for DnsDirectory {
    async fn list_peers(&self, selector: &Selector) -> Result<Vec<PeerRecord>> {
        let Selector::Service(name) = selector else {
            return Err(Error::Config(format!(
                "dns directory cannot resolve {selector}"
            )));
        };

        #[cfg(feature = "dns-srv")]
        {
            if let Some(resolver) = &self.resolver {
                let answer = self.lookup_srv(resolver, name).await;
                if let Some(records) = self.srv_records(name, answer) {
                    tracing::trace!(service = %name, peers = records.len(), "resolved SRV records");
                    return Ok(records);
                }
            }
        }

        let records = self.lookup_host(name).await?;
        tracing::trace!(service = %name, peers = records.len(), "resolved service");
        Ok(records)
    }

    fn supports(&self, selector: &Selector) -> bool {
        matches!(selector, Selector::Service(_))
    }

    fn describe(&self) -> String {
        format!("dns(port {})", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_records_dedup_and_order() {
        let directory = DnsDirectory::a_records(7800);
        let records = directory.records([
            (ip("10.0.0.2"), 7800),
            (ip("10.0.0.1"), 7800),
            (ip("10.0.0.2"), 7800),
        ]);

        let keys: Vec<_> = records.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["10.0.0.1:7800", "10.0.0.2:7800"]);
    }

    #[test]
    fn test_srv_ports_are_used() {
        let directory = DnsDirectory::a_records(7800);
        let records = directory
            .srv_records(
                "ping.broker.svc",
                Ok(vec![(ip("10.0.0.1"), 8888), (ip("10.0.0.2"), 0)]),
            )
            .unwrap();

        let keys: Vec<_> = records.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["10.0.0.1:8888", "10.0.0.2:7800"]);
    }

    #[test]
    fn test_srv_falls_back_to_service_port() {
        let directory = DnsDirectory::a_records(7800);

        assert!(directory.srv_records("ping.broker.svc", Ok(vec![])).is_none());
        assert!(directory
            .srv_records(
                "ping.broker.svc",
                Err(Error::Directory("NXDOMAIN".into()))
            )
            .is_none());
    }

    #[test]
    fn test_supports_only_service_selectors() {
        let directory = DnsDirectory::a_records(7800);
        assert!(directory.supports(&Selector::Service("ping".into())));
        assert!(!directory.supports(&Selector::default()));
        assert!(!directory.uses_srv());
    }

    #[tokio::test]
    async fn test_rejects_pod_selector() {
        let directory = DnsDirectory::a_records(7800);
        let err = directory
            .list_peers(&Selector::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_resolves_localhost_on_service_port() {
        let directory = DnsDirectory::a_records(7800);
        let peers = directory
            .list_peers(&Selector::Service("localhost".into()))
            .await
            .unwrap();
        assert!(!peers.is_empty());
        assert!(peers.iter().all(|p| p.port == 7800));
    }
}
