//! Fuzz target for segment reassembly
//!
//! Feeds arbitrary segment sequences into both stream modes. Reassembly must
//! never panic and never deliver more bytes than it was given.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use turnpike_core::{BodyType, ReceiveLogic};

#[derive(Debug, Arbitrary)]
struct Segment {
    sequence: u16,
    body_type: u8,
    payload: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
struct Input {
    reliable: bool,
    segments: Vec<Segment>,
}

fuzz_target!(|input: Input| {
    let mut receiver = ReceiveLogic::new(input.reliable);
    let mut fed = 0usize;
    let mut delivered = 0usize;

    for segment in input.segments {
        let sequence = u64::from(segment.sequence);
        let len = segment.payload.len();
        let receipt = receiver.receive(
            sequence,
            BodyType::from_bits(segment.body_type),
            segment.payload,
        );
        match receipt.ack {
            Some(ack) => {
                assert_eq!(ack, sequence);
                fed += len;
            }
            None => assert!(receipt.delivered.is_empty()),
        }
        delivered += receipt.delivered.iter().map(Vec::len).sum::<usize>();
    }

    assert!(delivered <= fed);
});
