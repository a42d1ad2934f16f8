//! Fuzz target: static analysis.
//!
//! `analyze` and `vet` must agree: a report without violations means the
//! source vets, and any violation means it does not.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quarry_core::CapabilitySet;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let caps = CapabilitySet::default();
    let report = quarry_auditor::analyze(source, &caps);
    let vetted = quarry_auditor::vet(source, &caps);
    assert_eq!(report.is_safe(), vetted.is_ok());

    // Reports must always serialize.
    let _ = serde_json::to_string(&report).expect("AnalysisReport serialization must not fail");
});
