//! Failure handling, reconnect backoff and permanent exclusion.

mod common;

use std::time::Duration;

use common::{key, manual_config, peers, start};
use peer_directory::testing::TransportCall;
use peer_directory::{BackoffPolicy, DiscoveryConfig, FailOutcome};

fn policy(config: &DiscoveryConfig) -> BackoffPolicy {
    config.backoff_policy()
}

#[tokio::test(start_paused = true)]
async fn test_delay_doubles_per_sustained_failure() {
    let config = manual_config().with_max_reconnect_attempts(0);
    let policy = policy(&config);
    let h = start(config, peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    for k in 0..7u32 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let outcome = h.discovery.peer_failed(&key("10.0.0.1"));
        let expected = policy.delay_after(k);
        assert_eq!(
            outcome,
            FailOutcome::Scheduled {
                delay: expected,
                counted: true,
                failures: k + 1
            }
        );

        tokio::time::sleep(expected + Duration::from_millis(1)).await;
        let peer = &h.discovery.snapshot()[0];
        assert!(!peer.is_failed());
        assert_eq!(peer.reconnect_delay(), policy.delay_after(k + 1));
    }

    assert_eq!(policy.delay_after(7), Duration::from_millis(16000));
    assert_eq!(h.transport.added_count(&key("10.0.0.1")), 8);
    assert_eq!(h.discovery.stats().reconnects, 7);
}

#[tokio::test(start_paused = true)]
async fn test_flap_retries_after_min_connect_time() {
    let h = start(manual_config(), peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.discovery.peer_failed(&key("10.0.0.1"));
    tokio::time::sleep(Duration::from_millis(1001)).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcome = h.discovery.peer_failed(&key("10.0.0.1"));

    assert_eq!(
        outcome,
        FailOutcome::Scheduled {
            delay: Duration::from_millis(1000),
            counted: false,
            failures: 1
        }
    );
    assert_eq!(h.discovery.snapshot()[0].connect_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_configurable_flap_threshold() {
    let config = manual_config()
        .with_min_connect_time(Duration::from_millis(500))
        .with_initial_reconnect_delay(Duration::from_millis(500));
    let h = start(config, peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let outcome = h.discovery.peer_failed(&key("10.0.0.1"));

    assert!(matches!(outcome, FailOutcome::Scheduled { counted: true, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_excluded_after_four_sustained_failures() {
    let h = start(manual_config(), peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        outcomes.push(h.discovery.peer_failed(&key("10.0.0.1")));
    }

    assert_eq!(outcomes[3], FailOutcome::Excluded { failures: 4 });
    assert_eq!(h.discovery.excluded(), vec![key("10.0.0.1")]);
    assert!(h.discovery.snapshot().is_empty());

    let report = h.discovery.poll_now().await.unwrap();
    assert!(report.added.is_empty());
    tokio::time::sleep(Duration::from_secs(60)).await;
    h.discovery.poll_now().await.unwrap();

    assert_eq!(h.transport.added_count(&key("10.0.0.1")), 4);
    assert_eq!(h.transport.removed_count(&key("10.0.0.1")), 4);
    assert_eq!(h.discovery.stats().exclusions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_readmit_lifts_exclusion() {
    let h = start(manual_config().with_max_reconnect_attempts(1), peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        h.discovery.peer_failed(&key("10.0.0.1")),
        FailOutcome::Excluded { failures: 1 }
    );

    assert!(h.discovery.readmit(&key("10.0.0.1")));
    assert!(!h.discovery.readmit(&key("10.0.0.1")));

    let report = h.discovery.poll_now().await.unwrap();
    assert_eq!(report.added, vec![key("10.0.0.1")]);
    assert_eq!(h.discovery.snapshot()[0].connect_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_suppresses_pending_reconnect() {
    let directory = peer_directory::testing::ScriptedDirectory::new();
    directory.push_ok(peers(&["10.0.0.1"]));
    directory.set_fallback(Ok(Vec::new()));
    let h = common::start_with(manual_config(), directory);
    h.discovery.poll_now().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.discovery.peer_failed(&key("10.0.0.1"));
    let report = h.discovery.poll_now().await.unwrap();
    assert_eq!(report.removed, vec![key("10.0.0.1")]);

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(
        h.transport.calls(),
        vec![
            TransportCall::Added(key("10.0.0.1")),
            TransportCall::Removed(key("10.0.0.1")),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_listed_failed_peer_is_restored_once() {
    let h = start(manual_config(), peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.discovery.peer_failed(&key("10.0.0.1"));
    let report = h.discovery.poll_now().await.unwrap();
    assert_eq!(report.restored, vec![key("10.0.0.1")]);

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.transport.added_count(&key("10.0.0.1")), 2);
    let peer = &h.discovery.snapshot()[0];
    assert!(!peer.reconnect_pending());
    assert_eq!(peer.connect_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_unknown_or_failed_peer_is_noop() {
    let h = start(manual_config(), peers(&["10.0.0.1"]));
    h.discovery.poll_now().await.unwrap();

    assert_eq!(h.discovery.peer_failed(&key("10.9.9.9")), FailOutcome::Untracked);
    h.discovery.peer_failed(&key("10.0.0.1"));
    assert_eq!(
        h.discovery.peer_failed(&key("10.0.0.1")),
        FailOutcome::AlreadyFailed
    );
    assert_eq!(h.transport.removed_count(&key("10.0.0.1")), 1);
}
