//! Directory client boundary.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::peer::PeerRecord;

/// What to ask the directory for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Selector {
    /// Every address a service name resolves to.
    Service(String),
    /// Pods of a namespace, optionally narrowed by a label selector.
    Pods {
        /// Namespace to list.
        namespace: String,
        /// Label selector, e.g. `app=broker,tier=backend`.
        labels: Option<String>,
    },
}

impl Default for Selector {
    fn default() -> Self {
        Selector::Pods {
            namespace: "default".to_string(),
            labels: None,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Service(name) => write!(f, "service {name}"),
            Selector::Pods {
                namespace,
                labels: Some(labels),
            } => write!(f, "pods in {namespace} matching {labels}"),
            Selector::Pods {
                namespace,
                labels: None,
            } => write!(f, "pods in {namespace}"),
        }
    }
}

/// Source of the current peer list.
///
/// Implementations must be idempotent: the engine retries a failed call
/// and never assumes anything about partially completed ones. A returned
/// error means "unknown", never "no peers".
///
/// # Example Implementation
///
/// ```ignore
/// use peer_directory::{DirectoryClient, PeerRecord, Result, Selector};
///
/// struct Consul { /* ... */ }
///
/// impl DirectoryClient for Consul {
///     async fn list_peers(&self, selector: &Selector) -> Result<Vec<PeerRecord>> {
///         // query the catalog and map entries to PeerRecords
///     }
/// }
/// ```
pub trait DirectoryClient: Send + Sync + 'static {
    /// List the peers currently matching `selector`.
    fn list_peers(
        &self,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<PeerRecord>>> + Send;

    /// Whether this directory can answer `selector` at all.
    ///
    /// Checked once when discovery starts. Directories that ignore the
    /// selector keep the default.
    fn supports(&self, _selector: &Selector) -> bool {
        true
    }

    /// Short description used in logs.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl<D: DirectoryClient> DirectoryClient for Arc<D> {
    fn list_peers(
        &self,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<PeerRecord>>> + Send {
        (**self).list_peers(selector)
    }

    fn supports(&self, selector: &Selector) -> bool {
        (**self).supports(selector)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selector() {
        assert_eq!(
            Selector::default(),
            Selector::Pods {
                namespace: "default".into(),
                labels: None
            }
        );
    }

    #[test]
    fn test_selector_display() {
        assert_eq!(Selector::Service("ping".into()).to_string(), "service ping");
        let pods = Selector::Pods {
            namespace: "prod".into(),
            labels: Some("app=broker".into()),
        };
        assert_eq!(pods.to_string(), "pods in prod matching app=broker");
    }
}
