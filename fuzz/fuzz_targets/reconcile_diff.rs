//! Fuzz target for reconciliation diffs.
//!
//! Replays an arbitrary sequence of directory answers and peer failures.
//! After every successful cycle the transport's view must equal the
//! directory's answer minus excluded peers, and each cycle must notify
//! exactly the difference to the previous view.

#![no_main]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use peer_directory::testing::RecordingTransport;
use peer_directory::{
    DiscoveryConfig, DiscoveryStats, PeerKey, PeerRecord, PeerRegistry, ReconciliationCycle,
    StaticDirectory,
};

#[derive(Debug, Arbitrary)]
enum Step {
    /// Directory answers with hosts 10.0.0.<n> for each n (mod 16).
    Answer(Vec<u8>),
    /// Transport reports host 10.0.0.<n> (mod 16) failed.
    Fail(u8),
}

fn record(n: u8) -> PeerRecord {
    PeerRecord::new(format!("10.0.0.{}", n % 16), 7800)
}

fuzz_target!(|steps: Vec<Step>| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
    else {
        return;
    };

    runtime.block_on(async move {
        let config = DiscoveryConfig::new()
            .with_operation_attempts(1)
            .with_operation_sleep(Duration::ZERO)
            .with_max_reconnect_attempts(0);
        let directory = Arc::new(StaticDirectory::default());
        let transport = Arc::new(RecordingTransport::new());
        let registry = Arc::new(PeerRegistry::new(config.initial_reconnect_delay));
        let cycle = ReconciliationCycle::new(
            &config,
            directory.clone(),
            transport.clone(),
            registry.clone(),
            Arc::new(DiscoveryStats::new()),
            tokio::runtime::Handle::current(),
            None,
        );

        for step in steps.into_iter().take(64) {
            match step {
                Step::Answer(hosts) => {
                    directory.set(hosts.iter().map(|n| record(*n)));
                    let report = cycle.run().await.expect("cycle runs");
                    let expected: BTreeSet<PeerKey> =
                        hosts.iter().map(|n| record(*n).key()).collect();
                    assert_eq!(transport.active(), expected);

                    let tracked: BTreeSet<PeerKey> =
                        registry.snapshot().iter().map(|p| p.key().clone()).collect();
                    assert_eq!(tracked, expected);
                    assert!(report.added.iter().all(|k| expected.contains(k)));
                    assert!(report.removed.iter().all(|k| !expected.contains(k)));
                }
                Step::Fail(n) => {
                    cycle.scheduler().fail(&record(n).key());
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }
    });
});
