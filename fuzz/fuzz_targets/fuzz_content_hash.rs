//! Fuzz target: `ContentHash` of source text.
//!
//! Hashing arbitrary bytes must be deterministic and display as 64 hex
//! chars; the JSON form must round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quarry_core::ContentHash;

fuzz_target!(|data: &[u8]| {
    let hash = ContentHash::of(data);
    assert_eq!(hash, ContentHash::of(data), "hashing must be deterministic");

    let hex = hash.to_string();
    assert_eq!(hex.len(), 64, "ContentHash Display must produce 64 hex chars");
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));

    let json = serde_json::to_string(&hash).expect("ContentHash serialization must not fail");
    let back: ContentHash = serde_json::from_str(&json).expect("ContentHash deserialization must not fail");
    assert_eq!(back, hash);
});
