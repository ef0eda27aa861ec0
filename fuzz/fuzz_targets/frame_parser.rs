//! Fuzz target for segment frame parsing
//!
//! The parser should never panic, and anything it accepts must encode back
//! to a frame that parses identically.

#![no_main]

use libfuzzer_sys::fuzz_target;
use turnpike_core::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let reparsed = Frame::decode(&frame.encode()).expect("re-encoded frame parses");
        assert_eq!(reparsed, frame);
    }
});
