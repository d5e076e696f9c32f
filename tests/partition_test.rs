//! Rolling-update partitioning and self identification.

mod common;

use std::collections::BTreeSet;

use common::{key, manual_config, peer, start};
use peer_directory::{PartitionOutcome, PeerRecord, RollingUpdatePartitioner};

fn generations() -> Vec<PeerRecord> {
    vec![
        peer("10.0.0.1").with_group_key("g1"),
        peer("10.0.0.2").with_group_key("g1"),
        peer("10.0.0.3").with_group_key("g2"),
    ]
}

#[test]
fn test_partitioner_keeps_local_generation() {
    let partitioner = RollingUpdatePartitioner::new(true, Some("10.0.0.1".parse().unwrap()));
    let mut candidates = generations();

    partitioner.partition(&mut candidates);

    let kept: Vec<_> = candidates.iter().map(|c| c.address.as_str()).collect();
    assert_eq!(kept, vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test(start_paused = true)]
async fn test_engine_announces_only_own_generation() {
    let config = manual_config()
        .with_local_address("10.0.0.1".parse().unwrap())
        .with_rolling_update_split(true);
    let h = start(config, generations());

    let report = h.discovery.poll_now().await.unwrap();

    assert_eq!(report.added, vec![key("10.0.0.2")]);
    assert_eq!(
        report.partition,
        PartitionOutcome::Partitioned {
            group: "g1".into(),
            kept: 2,
            dropped: 1
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_local_node_fails_open() {
    let config = manual_config()
        .with_local_address("10.0.0.9".parse().unwrap())
        .with_rolling_update_split(true);
    let h = start(config, generations());

    let report = h.discovery.poll_now().await.unwrap();

    assert!(matches!(report.partition, PartitionOutcome::Unidentified(_)));
    let expected: BTreeSet<_> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        .iter()
        .map(|ip| key(ip))
        .collect();
    assert_eq!(h.transport.active(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_partitioning_disabled_by_default() {
    let config = manual_config().with_local_address("10.0.0.1".parse().unwrap());
    let h = start(config, generations());

    let report = h.discovery.poll_now().await.unwrap();

    assert_eq!(report.partition, PartitionOutcome::Disabled);
    assert_eq!(report.added, vec![key("10.0.0.2"), key("10.0.0.3")]);
}

#[tokio::test(start_paused = true)]
async fn test_unready_local_node_still_identifies_group() {
    let config = manual_config()
        .with_local_address("10.0.0.1".parse().unwrap())
        .with_rolling_update_split(true)
        .with_require_ready(true);
    let mut records = generations();
    records[0] = records[0].clone().with_ready(false);
    let h = start(config, records);

    let report = h.discovery.poll_now().await.unwrap();

    assert!(matches!(report.partition, PartitionOutcome::Partitioned { .. }));
    assert_eq!(report.added, vec![key("10.0.0.2")]);
}

#[tokio::test(start_paused = true)]
async fn test_ipv6_local_address_is_skipped() {
    let config = manual_config().with_local_address("fd00::1".parse().unwrap());
    let h = start(
        config,
        vec![PeerRecord::new("fd00::1", 7800), PeerRecord::new("fd00::2", 7800)],
    );

    let report = h.discovery.poll_now().await.unwrap();

    let added: Vec<_> = report.added.iter().map(|k| k.to_string()).collect();
    assert_eq!(added, vec!["[fd00::2]:7800"]);
}
