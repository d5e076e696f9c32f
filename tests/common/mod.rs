//! Shared test utilities for peer-directory integration tests.
//!
//! Engines built here never poll on their own: the first scheduled cycle
//! is a day away, so every cycle is driven explicitly with `poll_now`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use peer_directory::testing::{RecordingTransport, ScriptedDirectory};
use peer_directory::{Discovery, DiscoveryConfig, PeerKey, PeerRecord};

pub type TestDiscovery = Discovery<Arc<ScriptedDirectory>, Arc<RecordingTransport>>;

/// Everything a test needs to drive and observe one engine.
pub struct Harness {
    pub discovery: TestDiscovery,
    pub directory: Arc<ScriptedDirectory>,
    pub transport: Arc<RecordingTransport>,
}

/// Config with manual polling and fast directory retries.
pub fn manual_config() -> DiscoveryConfig {
    DiscoveryConfig::new()
        .with_initial_delay(Duration::from_secs(24 * 60 * 60))
        .with_operation_attempts(3)
        .with_operation_sleep(Duration::from_millis(10))
}

/// Start an engine over a directory that always answers `records`.
pub fn start(config: DiscoveryConfig, records: Vec<PeerRecord>) -> Harness {
    start_with(config, ScriptedDirectory::repeating(records))
}

/// Start an engine over `directory`.
pub fn start_with(config: DiscoveryConfig, directory: ScriptedDirectory) -> Harness {
    let directory = Arc::new(directory);
    let transport = Arc::new(RecordingTransport::new());
    let discovery = Discovery::start(config, directory.clone(), transport.clone())
        .expect("engine should start");
    Harness {
        discovery,
        directory,
        transport,
    }
}

pub fn peer(ip: &str) -> PeerRecord {
    PeerRecord::new(ip, 7800)
}

pub fn key(ip: &str) -> PeerKey {
    peer(ip).key()
}

pub fn peers(ips: &[&str]) -> Vec<PeerRecord> {
    ips.iter().map(|ip| peer(ip)).collect()
}
