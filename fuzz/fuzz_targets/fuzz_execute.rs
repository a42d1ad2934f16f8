//! Fuzz target: restricted execution.
//!
//! Any vetted program must finish (successfully or with an error) within
//! tight limits, and its outcome must serialize.

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use quarry_core::CapabilitySet;
use quarry_executor::{extract, CancelToken, ExecutionLimits};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let caps = CapabilitySet::default();
    let Ok(program) = quarry_auditor::vet(source, &caps) else {
        return;
    };
    let mut limits = ExecutionLimits::with_timeout(Duration::from_millis(200));
    limits.max_steps = 100_000;
    limits.max_cells = 1_000_000;
    if let Ok(output) = quarry_executor::execute(&program, &caps, Vec::new(), &limits, CancelToken::new()) {
        let outcome = extract(source, &output.namespace);
        let _ = serde_json::to_string(&outcome).expect("Outcome serialization must not fail");
    }
});
