//! TURN ChannelData framing (RFC 5766 Section 11.4).
//!
//! ```text
//!  0                   1                   2                   3
//! +-------------------------------+-------------------------------+
//! |         Channel Number        |            Length             |
//! +-------------------------------+-------------------------------+
//! |                      Application Data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! No padding is added over UDP.

use super::error::StunError;

/// Lowest channel number a client may bind
pub const MIN_CHANNEL: u16 = 0x4000;
/// Highest channel number a client may bind
pub const MAX_CHANNEL: u16 = 0x7FFF;
/// ChannelData header size
pub const CHANNEL_HEADER_SIZE: usize = 4;

/// Whether `channel` lies in the bindable range
#[must_use]
pub fn is_valid_channel(channel: u16) -> bool {
    (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel)
}

/// Whether a datagram is ChannelData rather than a STUN message.
///
/// Inspects only the first two bytes: a big-endian value in
/// 0x4000..=0x7FFF marks channel data.
#[must_use]
pub fn is_channel_data(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && is_valid_channel(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// One ChannelData datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Channel number
    pub channel: u16,
    /// Application payload
    pub payload: Vec<u8>,
}

impl ChannelData {
    /// Wrap a payload for `channel`.
    #[must_use]
    pub fn new(channel: u16, payload: Vec<u8>) -> Self {
        Self { channel, payload }
    }

    /// Encode to wire format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_channel_data(self.channel, &self.payload)
    }

    /// Decode from wire format. Bytes past the declared length are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StunError::InvalidChannel` if the channel number is out of
    /// range, `StunError::TruncatedChannelData` if the payload is shorter
    /// than the length field says.
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < CHANNEL_HEADER_SIZE {
            return Err(StunError::TruncatedChannelData {
                declared: CHANNEL_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let channel = u16::from_be_bytes([bytes[0], bytes[1]]);
        if !is_valid_channel(channel) {
            return Err(StunError::InvalidChannel(channel));
        }

        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let available = bytes.len() - CHANNEL_HEADER_SIZE;
        if declared > available {
            return Err(StunError::TruncatedChannelData {
                declared,
                available,
            });
        }

        Ok(Self {
            channel,
            payload: bytes[CHANNEL_HEADER_SIZE..CHANNEL_HEADER_SIZE + declared].to_vec(),
        })
    }
}

/// Frame `payload` for `channel` without building a `ChannelData`.
#[must_use]
pub fn encode_channel_data(channel: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(CHANNEL_HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&channel.to_be_bytes());
    bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::{StunMessage, StunMethod};

    #[test]
    fn test_channel_data_roundtrip() {
        let frame = ChannelData::new(0x4001, b"hello".to_vec());
        let bytes = frame.encode();

        assert_eq!(bytes, [0x40, 0x01, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(ChannelData::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_demux_boundaries() {
        assert!(!is_channel_data(&[0x3F, 0xFF, 0, 0]));
        assert!(is_channel_data(&[0x40, 0x00, 0, 0]));
        assert!(is_channel_data(&[0x7F, 0xFF, 0, 0]));
        assert!(!is_channel_data(&[0x80, 0x00, 0, 0]));
        assert!(!is_channel_data(&[0x40]));
    }

    #[test]
    fn test_stun_message_is_not_channel_data() {
        let bytes = StunMessage::request(StunMethod::ChannelBind).encode();
        assert!(!is_channel_data(&bytes));
    }

    #[test]
    fn test_decode_rejects_invalid_channel() {
        assert_eq!(
            ChannelData::decode(&[0x80, 0x00, 0x00, 0x00]),
            Err(StunError::InvalidChannel(0x8000))
        );
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        assert_eq!(
            ChannelData::decode(&[0x40, 0x00, 0x00, 0x08, 1, 2]),
            Err(StunError::TruncatedChannelData {
                declared: 8,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let frame = ChannelData::decode(&[0x40, 0x10, 0x00, 0x01, 9, 0, 0, 0]).unwrap();
        assert_eq!(frame.channel, 0x4010);
        assert_eq!(frame.payload, vec![9]);
    }

    #[test]
    fn test_empty_payload() {
        let bytes = encode_channel_data(0x7FFF, &[]);
        assert_eq!(bytes.len(), CHANNEL_HEADER_SIZE);
        assert!(ChannelData::decode(&bytes).unwrap().payload.is_empty());
    }
}
