//! Fuzz target for configuration parsing.
//!
//! Feeds arbitrary property values to `DiscoveryConfig::from_lookup`. Parsing
//! must never panic, and every configuration it accepts must validate.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use peer_directory::DiscoveryConfig;

const PROPERTIES: [&str; 17] = [
    "DNS_SERVICE_NAME",
    "KUBERNETES_NAMESPACE",
    "OPENSHIFT_KUBE_PING_NAMESPACE",
    "KUBERNETES_LABELS",
    "OPENSHIFT_KUBE_PING_LABELS",
    "DNS_QUERY_INTERVAL",
    "KUBERNETES_CONNECT_TIMEOUT",
    "KUBERNETES_READ_TIMEOUT",
    "KUBERNETES_OPERATION_ATTEMPTS",
    "KUBERNETES_OPERATION_SLEEP",
    "MIN_CONNECT_TIME",
    "INITIAL_RECONNECT_DELAY",
    "MAX_RECONNECT_DELAY",
    "MAX_RECONNECT_ATTEMPTS",
    "SPLIT_CLUSTERS_DURING_ROLLING_UPDATE",
    "DISCOVERY_LOCAL_ADDRESS",
    "DISCOVERY_PORT_RANGE",
];

#[derive(Debug, Arbitrary)]
struct FuzzProperties {
    values: [Option<String>; 17],
}

fuzz_target!(|input: FuzzProperties| {
    let lookup = |name: &str| {
        PROPERTIES
            .iter()
            .position(|p| *p == name)
            .and_then(|i| input.values[i].clone())
    };

    if let Ok(config) = DiscoveryConfig::from_lookup(lookup) {
        assert!(config.validate().is_ok());
        assert!(config.initial_reconnect_delay <= config.max_reconnect_delay);
        assert!(config.operation_attempts > 0);
    }
});
