//! Property-based tests for Turnpike
//!
//! Uses proptest to check codec and reassembly laws across large input spaces.

use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

fn socket_addr() -> impl Strategy<Value = SocketAddr> {
    prop_oneof![
        (any::<[u8; 4]>(), any::<u16>())
            .prop_map(|(ip, port)| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)),
        (any::<[u8; 16]>(), any::<u16>())
            .prop_map(|(ip, port)| SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port)),
    ]
}

// ============================================================================
// STUN Codec Properties
// ============================================================================

mod stun_properties {
    use super::*;
    use turnpike_relay::stun::{
        StunAttribute, StunClass, StunError, StunMessage, StunMethod, TransactionId, xor_address,
    };

    fn method() -> impl Strategy<Value = StunMethod> {
        prop_oneof![
            Just(StunMethod::Binding),
            Just(StunMethod::Allocate),
            Just(StunMethod::Refresh),
            Just(StunMethod::Send),
            Just(StunMethod::Data),
            Just(StunMethod::CreatePermission),
            Just(StunMethod::ChannelBind),
        ]
    }

    fn class() -> impl Strategy<Value = StunClass> {
        prop_oneof![
            Just(StunClass::Request),
            Just(StunClass::Indication),
            Just(StunClass::SuccessResponse),
            Just(StunClass::ErrorResponse),
        ]
    }

    fn attribute() -> impl Strategy<Value = StunAttribute> {
        prop_oneof![
            socket_addr().prop_map(StunAttribute::XorMappedAddress),
            socket_addr().prop_map(StunAttribute::XorRelayedAddress),
            socket_addr().prop_map(StunAttribute::XorPeerAddress),
            "[a-z0-9]{0,20}".prop_map(StunAttribute::Username),
            "[a-z0-9]{0,20}".prop_map(StunAttribute::Realm),
            "[a-z0-9]{0,20}".prop_map(StunAttribute::Nonce),
            (300u16..700, "[a-zA-Z ]{0,20}")
                .prop_map(|(code, reason)| StunAttribute::ErrorCode { code, reason }),
            any::<u32>().prop_map(StunAttribute::Lifetime),
            Just(StunAttribute::DontFragment),
            (0x4000u16..=0x7FFF).prop_map(StunAttribute::ChannelNumber),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(StunAttribute::Data),
            (0xC001u16..=0xCFFF, prop::collection::vec(any::<u8>(), 0..32))
                .prop_map(|(t, v)| StunAttribute::Unknown(t, v)),
        ]
    }

    proptest! {
        /// Encode then decode reproduces the message
        #[test]
        fn message_roundtrip(
            method in method(),
            class in class(),
            id in any::<[u8; 12]>(),
            attributes in prop::collection::vec(attribute(), 0..8),
        ) {
            let mut message = StunMessage::new(method, class);
            message.transaction_id = TransactionId::from_bytes(id);
            for attr in attributes {
                message.add_attribute(attr);
            }

            let encoded = message.encode();
            prop_assert_eq!(encoded.len() % 4, 0);

            let decoded = StunMessage::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, message);
        }

        /// XOR-ADDRESS is its own inverse for both families
        #[test]
        fn xor_address_involution(addr in socket_addr(), id in any::<[u8; 12]>()) {
            let id = TransactionId::from_bytes(id);
            prop_assert_eq!(xor_address(xor_address(addr, &id), &id), addr);
        }

        /// Integrity computed with a key verifies with that key only
        #[test]
        fn integrity_binds_key(
            key in any::<[u8; 16]>(),
            other in any::<[u8; 16]>(),
            username in "[a-z]{1,12}",
        ) {
            let mut message = StunMessage::request(StunMethod::Allocate)
                .with_attribute(StunAttribute::Username(username));
            message.add_message_integrity(&key);

            let decoded = StunMessage::decode(&message.encode()).unwrap();
            prop_assert!(decoded.verify_message_integrity(&key).is_ok());
            if other != key {
                prop_assert!(decoded.verify_message_integrity(&other).is_err());
            }
        }

        /// Buffers whose length is not a multiple of four are rejected
        #[test]
        fn misaligned_rejected(extra in 1usize..4, attributes in prop::collection::vec(attribute(), 0..4)) {
            let mut message = StunMessage::request(StunMethod::Refresh);
            for attr in attributes {
                message.add_attribute(attr);
            }
            let mut encoded = message.encode();
            encoded.extend(std::iter::repeat_n(0u8, extra));

            prop_assert!(matches!(
                StunMessage::decode(&encoded),
                Err(StunError::Misaligned(_))
            ));
        }

        /// Decode never panics on arbitrary input
        #[test]
        fn decode_arbitrary(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = StunMessage::decode(&bytes);
        }
    }
}

// ============================================================================
// ChannelData Properties
// ============================================================================

mod channel_data_properties {
    use super::*;
    use turnpike_relay::stun::{ChannelData, is_channel_data};

    proptest! {
        /// Encode then decode reproduces channel and payload
        #[test]
        fn channel_data_roundtrip(
            channel in 0x4000u16..=0x7FFF,
            payload in prop::collection::vec(any::<u8>(), 0..1500),
        ) {
            let frame = ChannelData::new(channel, payload);
            let encoded = frame.encode();

            prop_assert!(is_channel_data(&encoded));
            prop_assert_eq!(ChannelData::decode(&encoded).unwrap(), frame);
        }

        /// Channels outside the bindable range are rejected
        #[test]
        fn channel_out_of_range(
            channel in prop_oneof![0u16..0x4000, 0x8000u16..=u16::MAX],
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let encoded = ChannelData::new(channel, payload).encode();
            prop_assert!(!is_channel_data(&encoded));
            prop_assert!(ChannelData::decode(&encoded).is_err());
        }
    }
}

// ============================================================================
// Segment Frame Properties
// ============================================================================

mod frame_properties {
    use super::*;
    use turnpike_core::{BodyType, Frame};

    fn body_type() -> impl Strategy<Value = BodyType> {
        prop_oneof![
            Just(BodyType::Complete),
            Just(BodyType::PartialStart),
            Just(BodyType::PartialMiddle),
            Just(BodyType::PartialEnd),
        ]
    }

    fn frame() -> impl Strategy<Value = Frame> {
        prop_oneof![
            (any::<bool>(), body_type(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..1400))
                .prop_map(|(reliable, body_type, sequence, payload)| Frame::Data {
                    reliable,
                    body_type,
                    sequence,
                    payload,
                }),
            (any::<bool>(), any::<u64>())
                .prop_map(|(reliable, sequence)| Frame::Ack { reliable, sequence }),
            any::<u64>().prop_map(|nonce| Frame::Ping { nonce }),
            any::<u64>().prop_map(|nonce| Frame::Pong { nonce }),
        ]
    }

    proptest! {
        /// Encode then decode reproduces the frame
        #[test]
        fn frame_roundtrip(frame in frame()) {
            prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }

        /// Any strict prefix of a frame fails to decode
        #[test]
        fn truncated_frame_rejected(frame in frame(), cut in any::<prop::sample::Index>()) {
            let encoded = frame.encode();
            let len = cut.index(encoded.len());
            prop_assert!(Frame::decode(&encoded[..len]).is_err());
        }

        /// Decode never panics on arbitrary input
        #[test]
        fn decode_arbitrary(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = Frame::decode(&bytes);
        }
    }
}

// ============================================================================
// Segmentation and Reassembly Properties
// ============================================================================

mod reassembly_properties {
    use super::*;
    use turnpike_core::segment::split;
    use turnpike_core::{BodyType, ReceiveLogic};

    fn messages() -> impl Strategy<Value = Vec<Vec<u8>>> {
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..400), 1..8)
    }

    /// Sequence every segment of `messages` consecutively from zero
    fn segments(messages: &[Vec<u8>], mss: usize) -> Vec<(u64, BodyType, Vec<u8>)> {
        messages
            .iter()
            .flat_map(|message| split(message, mss))
            .enumerate()
            .map(|(sequence, (body_type, chunk))| (sequence as u64, body_type, chunk))
            .collect()
    }

    proptest! {
        /// Split segments never exceed the segment size and concatenate back
        #[test]
        fn split_concatenates(payload in prop::collection::vec(any::<u8>(), 0..2000), mss in 1usize..300) {
            let parts = split(&payload, mss);
            prop_assert!(parts.iter().all(|(_, chunk)| chunk.len() <= mss));
            prop_assert!(parts.last().unwrap().0.ends_message());

            let joined: Vec<u8> = parts.into_iter().flat_map(|(_, chunk)| chunk).collect();
            prop_assert_eq!(joined, payload);
        }

        /// In-order delivery reproduces every message in both modes
        #[test]
        fn in_order_reassembly(messages in messages(), mss in 1usize..128, reliable in any::<bool>()) {
            let mut receiver = ReceiveLogic::new(reliable);
            let mut delivered = Vec::new();
            for (sequence, body_type, chunk) in segments(&messages, mss) {
                let receipt = receiver.receive(sequence, body_type, chunk);
                prop_assert_eq!(receipt.ack, Some(sequence));
                delivered.extend(receipt.delivered);
            }

            prop_assert_eq!(delivered, messages);
            prop_assert_eq!(receiver.pending_len(), 0);
        }

        /// Reliable reassembly is independent of arrival order
        #[test]
        fn shuffled_reliable_reassembly(
            (messages, order) in messages().prop_flat_map(|messages| {
                let count = segments(&messages, 64).len();
                let order = Just((0..count).collect::<Vec<_>>()).prop_shuffle();
                (Just(messages), order)
            }),
        ) {
            let all = segments(&messages, 64);
            let mut receiver = ReceiveLogic::new(true);
            let mut delivered = Vec::new();
            for index in order {
                let (sequence, body_type, chunk) = all[index].clone();
                delivered.extend(receiver.receive(sequence, body_type, chunk).delivered);
            }

            prop_assert_eq!(delivered, messages);
            prop_assert_eq!(receiver.expected(), all.len() as u64);
        }

        /// Duplicates never produce a second delivery
        #[test]
        fn duplicates_ignored(messages in messages(), reliable in any::<bool>()) {
            let mut receiver = ReceiveLogic::new(reliable);
            let mut delivered = Vec::new();
            for (sequence, body_type, chunk) in segments(&messages, 100) {
                delivered.extend(receiver.receive(sequence, body_type, chunk.clone()).delivered);
                delivered.extend(receiver.receive(sequence, body_type, chunk).delivered);
            }

            prop_assert_eq!(delivered, messages);
        }
    }
}
