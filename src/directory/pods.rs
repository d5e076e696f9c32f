//! Kubernetes pod list decoding.
//!
//! The HTTP call to the API server stays with the caller; this module
//! builds the request path and turns the `PodList` response body into
//! peer records.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use serde::Deserialize;

use super::traits::Selector;
use crate::error::{Error, Result};
use crate::peer::PeerRecord;

/// Labels consulted, in order, for a pod's group key.
pub const GROUP_LABELS: [&str; 3] = ["pod-template-hash", "deployment", "deploymentconfig"];

#[derive(Debug, Deserialize)]
struct PodList {
    items: Option<Vec<Pod>>,
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: Option<PodSpec>,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default)]
    ports: Vec<ContainerPort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPort {
    #[serde(default)]
    name: Option<String>,
    container_port: u16,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default, rename = "podIP")]
    pod_ip: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: String,
}

impl Pod {
    fn group_key(&self) -> Option<String> {
        GROUP_LABELS
            .iter()
            .find_map(|label| self.metadata.labels.get(*label))
            .cloned()
    }

    fn port(&self, options: &PodDecodeOptions) -> u16 {
        let Some(name) = options.port_name.as_deref() else {
            return options.default_port;
        };
        self.spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .flat_map(|container| container.ports.iter())
            .find(|port| port.name.as_deref() == Some(name))
            .map_or(options.default_port, |port| port.container_port)
    }
}

impl PodStatus {
    fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .find(|c| c.kind == "Ready")
            .map_or(true, |c| c.status.eq_ignore_ascii_case("true"))
    }
}

/// How pod entries become peer records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodDecodeOptions {
    /// Port used when no named container port applies.
    pub default_port: u16,
    /// Name of the container port to announce, if any.
    pub port_name: Option<String>,
}

impl PodDecodeOptions {
    /// Announce every pod on `default_port`.
    pub fn new(default_port: u16) -> Self {
        Self {
            default_port,
            port_name: None,
        }
    }

    /// Prefer the container port called `name` (builder pattern).
    pub fn with_port_name(mut self, name: impl Into<String>) -> Self {
        self.port_name = Some(name.into());
        self
    }
}

/// Decode a `PodList` JSON body into peer records.
///
/// Pods without an IP, with an unparsable IP, or in a phase other than
/// `Running` are skipped. A pod appearing twice under the same IP is
/// listed once. A body that is not a pod list is an error, never an
/// empty result.
pub fn decode_pod_list(body: &[u8], options: &PodDecodeOptions) -> Result<Vec<PeerRecord>> {
    let list: PodList = serde_json::from_slice(body)?;
    let items = list
        .items
        .ok_or_else(|| Error::Decode("pod list is missing \"items\"".to_string()))?;

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());

    for pod in items {
        let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
        let Some(status) = pod.status.as_ref() else {
            continue;
        };
        let Some(raw_ip) = status.pod_ip.as_deref() else {
            continue;
        };
        if let Some(phase) = status.phase.as_deref() {
            if phase != "Running" {
                tracing::trace!(pod = name, ip = raw_ip, phase, "skipped pod that is not running");
                continue;
            }
        }
        let ip: IpAddr = match raw_ip.parse() {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(pod = name, ip = raw_ip, error = %e, "skipped pod with invalid IP");
                continue;
            }
        };
        if !seen.insert(ip) {
            continue;
        }

        let mut record = PeerRecord::new(ip.to_string(), pod.port(options))
            .with_ready(status.is_ready());
        if let Some(group) = pod.group_key() {
            record = record.with_group_key(group);
        }
        records.push(record);
    }

    Ok(records)
}

/// Pod listing request for the Kubernetes API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodQuery {
    /// Namespace to list.
    pub namespace: String,
    /// Optional label selector.
    pub labels: Option<String>,
}

impl PodQuery {
    /// Create a query for `namespace`.
    pub fn new(namespace: impl Into<String>, labels: Option<String>) -> Self {
        Self {
            namespace: namespace.into(),
            labels,
        }
    }

    /// Query for a pod selector; `None` for any other selector.
    pub fn from_selector(selector: &Selector) -> Option<Self> {
        match selector {
            Selector::Pods { namespace, labels } => Some(Self::new(namespace.clone(), labels.clone())),
            Selector::Service(_) => None,
        }
    }

    /// Request path relative to the API root, e.g. `/namespaces/default/pods`.
    ///
    /// The namespace and the label selector are percent-encoded.
    pub fn path(&self) -> String {
        let mut path = format!("/namespaces/{}/pods", urlencoding::encode(&self.namespace));
        if let Some(labels) = self.labels.as_deref().filter(|l| !l.is_empty()) {
            path.push_str("?labelSelector=");
            path.push_str(&urlencoding::encode(labels));
        }
        path
    }
}
