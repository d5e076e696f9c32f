//! Fuzz target for Kubernetes pod list decoding.
//!
//! Decoding arbitrary bytes must never panic. Accepted lists never contain
//! the same address twice.

#![no_main]

use std::collections::HashSet;

use libfuzzer_sys::fuzz_target;
use peer_directory::{decode_pod_list, PodDecodeOptions};

fuzz_target!(|data: &[u8]| {
    let options = PodDecodeOptions::new(7800).with_port_name("ping");
    if let Ok(records) = decode_pod_list(data, &options) {
        let mut seen = HashSet::new();
        for record in &records {
            assert!(seen.insert(record.address.clone()), "duplicate {}", record.address);
            assert!(record.address.parse::<std::net::IpAddr>().is_ok());
        }
    }
});
