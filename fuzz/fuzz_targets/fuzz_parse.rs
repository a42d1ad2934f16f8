//! Fuzz target: lexer and parser.
//!
//! Arbitrary text must either parse or produce a `CoreError` carrying a
//! line number; it must never panic or overflow the stack.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if let Err(e) = quarry_core::parse(source) {
        assert!(e.line().is_some(), "syntax errors must carry a line: {e}");
    }
});
