//! Configuration for directory-driven discovery.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::directory::Selector;
use crate::error::{Error, Result};

/// Configuration options for a discovery instance.
///
/// The reconnect settings control how aggressively a peer that dropped out
/// is re-announced, and when it is given up on for good.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryConfig {
    /// What to ask the directory for.
    ///
    /// Default: pods in namespace `default`, no label selector
    pub selector: Selector,

    /// Period between reconciliation cycles.
    ///
    /// Default: 30s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub query_interval: Duration,

    /// Delay before the first cycle.
    ///
    /// Default: 0 (immediate)
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub initial_delay: Duration,

    /// Max time to establish a connection to the directory.
    ///
    /// Default: 5s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub connect_timeout: Duration,

    /// Max time to wait for a directory response.
    ///
    /// Default: 30s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub read_timeout: Duration,

    /// Number of attempts per directory query.
    ///
    /// Default: 3
    pub operation_attempts: u32,

    /// Sleep between directory query attempts.
    ///
    /// Default: 1s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub operation_sleep: Duration,

    /// How long a peer must stay connected for a later loss to count as a failure.
    ///
    /// Default: 1s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub min_connect_time: Duration,

    /// First reconnect delay for a peer.
    ///
    /// Default: same as `min_connect_time`
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub initial_reconnect_delay: Duration,

    /// Ceiling for the doubled reconnect delay.
    ///
    /// Default: 16s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub max_reconnect_delay: Duration,

    /// Failures after which a peer is excluded until restart. `0` disables exclusion.
    ///
    /// Default: 4
    pub max_reconnect_attempts: u32,

    /// Restrict membership to the local peer's deployment generation.
    ///
    /// Default: false
    pub split_clusters_during_rolling_update: bool,

    /// Address this node is bound to.
    ///
    /// Used to find the local group key and to avoid announcing ourselves.
    ///
    /// Default: None
    pub local_address: Option<IpAddr>,

    /// Only admit peers the directory reports as ready.
    ///
    /// Filtering on readiness can make starting nodes form separate
    /// clusters that later have to merge, so it is off by default.
    ///
    /// Default: false
    pub require_ready: bool,

    /// Number of additional consecutive ports announced per host.
    ///
    /// `0` announces only the reported port, `1` announces `port` and `port + 1`.
    ///
    /// Default: 0
    pub port_range: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let min_connect_time = Duration::from_millis(1000);
        Self {
            selector: Selector::default(),
            query_interval: Duration::from_secs(30),
            initial_delay: Duration::ZERO,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            operation_attempts: 3,
            operation_sleep: Duration::from_secs(1),
            min_connect_time,
            initial_reconnect_delay: min_connect_time,
            max_reconnect_delay: Duration::from_millis(16000),
            max_reconnect_attempts: 4,
            split_clusters_during_rolling_update: false,
            local_address: None,
            require_ready: false,
            port_range: 0,
        }
    }
}

impl DiscoveryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for DNS-based discovery of `service`.
    pub fn dns(service: impl Into<String>) -> Self {
        Self {
            selector: Selector::Service(service.into()),
            ..Self::default()
        }
    }

    /// Configuration for pod-list discovery in `namespace`.
    pub fn kubernetes(namespace: impl Into<String>, labels: Option<String>) -> Self {
        Self {
            selector: Selector::Pods {
                namespace: namespace.into(),
                labels,
            },
            ..Self::default()
        }
    }

    /// Set the selector (builder pattern).
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the query interval (builder pattern).
    pub const fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = interval;
        self
    }

    /// Set the delay before the first cycle (builder pattern).
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the connect timeout (builder pattern).
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout (builder pattern).
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the number of attempts per directory query (builder pattern).
    pub const fn with_operation_attempts(mut self, attempts: u32) -> Self {
        self.operation_attempts = attempts;
        self
    }

    /// Set the sleep between directory query attempts (builder pattern).
    pub const fn with_operation_sleep(mut self, sleep: Duration) -> Self {
        self.operation_sleep = sleep;
        self
    }

    /// Set the minimum connect time (builder pattern).
    pub const fn with_min_connect_time(mut self, time: Duration) -> Self {
        self.min_connect_time = time;
        self
    }

    /// Set the initial reconnect delay (builder pattern).
    pub const fn with_initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.initial_reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnect delay (builder pattern).
    pub const fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnect attempts (builder pattern).
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Enable or disable rolling-update partitioning (builder pattern).
    pub const fn with_rolling_update_split(mut self, enabled: bool) -> Self {
        self.split_clusters_during_rolling_update = enabled;
        self
    }

    /// Set the local bound address (builder pattern).
    pub const fn with_local_address(mut self, addr: IpAddr) -> Self {
        self.local_address = Some(addr);
        self
    }

    /// Only admit ready peers (builder pattern).
    pub const fn with_require_ready(mut self, require: bool) -> Self {
        self.require_ready = require;
        self
    }

    /// Set the port range (builder pattern).
    pub const fn with_port_range(mut self, range: u16) -> Self {
        self.port_range = range;
        self
    }

    /// Per-attempt deadline for a directory query.
    pub fn attempt_timeout(&self) -> Duration {
        self.connect_timeout.saturating_add(self.read_timeout)
    }

    /// Reconnect policy derived from this configuration.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            min_connect_time: self.min_connect_time,
            initial_reconnect_delay: self.initial_reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }

    /// Check the configuration for inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.query_interval.is_zero() {
            return Err(Error::Config("query_interval must be > 0".into()));
        }
        if self.operation_attempts == 0 {
            return Err(Error::Config("operation_attempts must be > 0".into()));
        }
        if self.initial_reconnect_delay.is_zero() {
            return Err(Error::Config("initial_reconnect_delay must be > 0".into()));
        }
        if self.initial_reconnect_delay > self.max_reconnect_delay {
            return Err(Error::Config(format!(
                "initial_reconnect_delay ({}ms) exceeds max_reconnect_delay ({}ms)",
                self.initial_reconnect_delay.as_millis(),
                self.max_reconnect_delay.as_millis()
            )));
        }
        match &self.selector {
            Selector::Service(name) if name.trim().is_empty() => {
                Err(Error::Config("service name must not be empty".into()))
            }
            Selector::Pods { namespace, .. } if namespace.trim().is_empty() => {
                Err(Error::Config("namespace must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Build a configuration from process environment variables.
    ///
    /// See [`DiscoveryConfig::from_lookup`] for the recognised names.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a property lookup.
    ///
    /// Recognised properties (durations in milliseconds unless noted):
    ///
    /// | Property | Field |
    /// |----------|-------|
    /// | `DNS_SERVICE_NAME` | `selector` (DNS) |
    /// | `KUBERNETES_NAMESPACE` / `OPENSHIFT_KUBE_PING_NAMESPACE` | `selector` (pods) |
    /// | `KUBERNETES_LABELS` / `OPENSHIFT_KUBE_PING_LABELS` | `selector` (pods) |
    /// | `DNS_QUERY_INTERVAL` (seconds) | `query_interval` |
    /// | `KUBERNETES_CONNECT_TIMEOUT` | `connect_timeout` |
    /// | `KUBERNETES_READ_TIMEOUT` | `read_timeout` |
    /// | `KUBERNETES_OPERATION_ATTEMPTS` | `operation_attempts` |
    /// | `KUBERNETES_OPERATION_SLEEP` | `operation_sleep` |
    /// | `MIN_CONNECT_TIME` | `min_connect_time` |
    /// | `INITIAL_RECONNECT_DELAY` | `initial_reconnect_delay` |
    /// | `MAX_RECONNECT_DELAY` | `max_reconnect_delay` |
    /// | `MAX_RECONNECT_ATTEMPTS` | `max_reconnect_attempts` |
    /// | `SPLIT_CLUSTERS_DURING_ROLLING_UPDATE` | `split_clusters_during_rolling_update` |
    /// | `DISCOVERY_LOCAL_ADDRESS` | `local_address` |
    /// | `DISCOVERY_PORT_RANGE` | `port_range` |
    ///
    /// Unparsable values are reported as [`Error::Config`]; the result is
    /// validated before it is returned.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let with_fallback = |name: &str, deprecated: &str| {
            let current = get(name);
            let old = get(deprecated);
            match (&current, &old) {
                (Some(_), Some(_)) => tracing::warn!(
                    "Both {} and {} are defined, {} is deprecated so please remove it",
                    name,
                    deprecated,
                    deprecated
                ),
                (None, Some(_)) => tracing::warn!(
                    "{} is deprecated, please remove it and use {} instead",
                    deprecated,
                    name
                ),
                _ => {}
            }
            current.or(old)
        };

        let mut config = Self::default();
        let namespace = with_fallback("KUBERNETES_NAMESPACE", "OPENSHIFT_KUBE_PING_NAMESPACE");
        let labels = with_fallback("KUBERNETES_LABELS", "OPENSHIFT_KUBE_PING_LABELS");

        if let Some(service) = get("DNS_SERVICE_NAME") {
            config.selector = Selector::Service(service);
        } else if namespace.is_some() || labels.is_some() {
            config.selector = Selector::Pods {
                namespace: namespace.unwrap_or_else(|| "default".to_string()),
                labels,
            };
        }

        if let Some(v) = get("DNS_QUERY_INTERVAL") {
            config.query_interval = Duration::from_secs(parse("DNS_QUERY_INTERVAL", &v)?);
        }
        if let Some(v) = get("KUBERNETES_CONNECT_TIMEOUT") {
            config.connect_timeout = parse_millis("KUBERNETES_CONNECT_TIMEOUT", &v)?;
        }
        if let Some(v) = get("KUBERNETES_READ_TIMEOUT") {
            config.read_timeout = parse_millis("KUBERNETES_READ_TIMEOUT", &v)?;
        }
        if let Some(v) = get("KUBERNETES_OPERATION_ATTEMPTS") {
            config.operation_attempts = parse("KUBERNETES_OPERATION_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("KUBERNETES_OPERATION_SLEEP") {
            config.operation_sleep = parse_millis("KUBERNETES_OPERATION_SLEEP", &v)?;
        }
        if let Some(v) = get("MIN_CONNECT_TIME") {
            config.min_connect_time = parse_millis("MIN_CONNECT_TIME", &v)?;
            config.initial_reconnect_delay = config.min_connect_time;
        }
        if let Some(v) = get("INITIAL_RECONNECT_DELAY") {
            config.initial_reconnect_delay = parse_millis("INITIAL_RECONNECT_DELAY", &v)?;
        }
        if let Some(v) = get("MAX_RECONNECT_DELAY") {
            config.max_reconnect_delay = parse_millis("MAX_RECONNECT_DELAY", &v)?;
        }
        if let Some(v) = get("MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = parse("MAX_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("SPLIT_CLUSTERS_DURING_ROLLING_UPDATE") {
            config.split_clusters_during_rolling_update =
                parse("SPLIT_CLUSTERS_DURING_ROLLING_UPDATE", &v.to_ascii_lowercase())?;
        }
        if let Some(v) = get("DISCOVERY_LOCAL_ADDRESS") {
            config.local_address = Some(parse("DISCOVERY_LOCAL_ADDRESS", &v)?);
        }
        if let Some(v) = get("DISCOVERY_PORT_RANGE") {
            config.port_range = parse("DISCOVERY_PORT_RANGE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid value {:?} for {}: {}", value, name, e)))
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    parse::<u64>(name, value).map(Duration::from_millis)
}

#[cfg(feature = "serde")]
mod humantime_serde_impl {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = u64::try_from(duration.as_millis()).map_err(|_| {
            serde::ser::Error::custom(format!("duration {duration:?} does not fit in u64 milliseconds"))
        })?;
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("{}ms", ms))
        } else {
            serializer.serialize_u64(ms)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let ms: u64 = s
                .trim_end_matches("ms")
                .parse()
                .map_err(serde::de::Error::custom)?;
            Ok(Duration::from_millis(ms))
        } else {
            let ms = u64::deserialize(deserializer)?;
            Ok(Duration::from_millis(ms))
        }
    }
}
