//! Fuzz target for STUN and ChannelData decoding
//!
//! Tests that both relay codecs handle arbitrary datagrams without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use turnpike_relay::stun::{ChannelData, StunMessage, is_channel_data};

fuzz_target!(|data: &[u8]| {
    if is_channel_data(data) {
        let _ = ChannelData::decode(data);
        return;
    }

    if let Ok(message) = StunMessage::decode(data) {
        // Accessors walk the decoded attributes
        let _ = message.xor_relayed_address();
        let _ = message.error_code();
        let _ = message.verify_message_integrity(&[0u8; 16]);
        let _ = StunMessage::decode(&message.encode());
    }
});
