//! Segment frame encoding and decoding.
//!
//! Frames travel inside TURN channel data. All multi-byte fields are
//! big-endian.
//!
//! ```text
//! Data:  0x01 | flags | sequence:u64 | length:u16 | payload
//! Ack:   0x02 | flags | sequence:u64
//! Ping:  0x05 | nonce:u64
//! Pong:  0x06 | nonce:u64
//! ```
//!
//! Flag bit 0 marks the reliable stream; bits 1-2 carry the body type of a
//! data segment.

use crate::error::FrameError;
use crate::segment::BodyType;

/// Data frame header size
pub const DATA_HEADER_SIZE: usize = 12;
/// Ack frame size
pub const ACK_SIZE: usize = 10;
/// Ping/Pong frame size
pub const PING_SIZE: usize = 9;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Sequenced segment
    Data = 0x01,
    /// Segment acknowledgment
    Ack = 0x02,
    /// Liveness probe
    Ping = 0x05,
    /// Response to PING
    Pong = 0x06,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Ack),
            0x05 => Ok(Self::Ping),
            0x06 => Ok(Self::Pong),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

const FLAG_RELIABLE: u8 = 0b0000_0001;
const BODY_TYPE_SHIFT: u8 = 1;
const BODY_TYPE_MASK: u8 = 0b0000_0110;

/// Decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sequenced segment
    Data {
        /// Stream the segment belongs to
        reliable: bool,
        /// Position within its message
        body_type: BodyType,
        /// Sequence number
        sequence: u64,
        /// Segment payload
        payload: Vec<u8>,
    },
    /// Acknowledgment of one sequence
    Ack {
        /// Stream being acknowledged
        reliable: bool,
        /// Sequence number
        sequence: u64,
    },
    /// Liveness probe
    Ping {
        /// Echoed in the pong
        nonce: u64,
    },
    /// Response to a ping
    Pong {
        /// Nonce from the ping
        nonce: u64,
    },
}

impl Frame {
    /// Frame type
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Data { .. } => FrameType::Data,
            Self::Ack { .. } => FrameType::Ack,
            Self::Ping { .. } => FrameType::Ping,
            Self::Pong { .. } => FrameType::Pong,
        }
    }

    /// Encode to wire format.
    ///
    /// Data payloads must fit the 16-bit length field; segmentation
    /// guarantees this.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data {
                reliable,
                body_type,
                sequence,
                payload,
            } => {
                debug_assert!(payload.len() <= usize::from(u16::MAX));
                let mut buf = Vec::with_capacity(DATA_HEADER_SIZE + payload.len());
                buf.push(FrameType::Data as u8);
                buf.push(reliable_flag(*reliable) | (body_type.as_u8() << BODY_TYPE_SHIFT));
                buf.extend_from_slice(&sequence.to_be_bytes());
                buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            Self::Ack { reliable, sequence } => {
                let mut buf = Vec::with_capacity(ACK_SIZE);
                buf.push(FrameType::Ack as u8);
                buf.push(reliable_flag(*reliable));
                buf.extend_from_slice(&sequence.to_be_bytes());
                buf
            }
            Self::Ping { nonce } | Self::Pong { nonce } => {
                let mut buf = Vec::with_capacity(PING_SIZE);
                buf.push(self.frame_type() as u8);
                buf.extend_from_slice(&nonce.to_be_bytes());
                buf
            }
        }
    }

    /// Decode from wire format. Bytes after the frame are ignored.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` for unknown types or flags, truncated frames, or
    /// a payload length past the end of the buffer.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let Some(&type_byte) = data.first() else {
            return Err(FrameError::TooShort {
                expected: 1,
                actual: 0,
            });
        };

        match FrameType::try_from(type_byte)? {
            FrameType::Data => {
                require(data, DATA_HEADER_SIZE)?;
                let flags = data[1];
                check_flags(flags, FLAG_RELIABLE | BODY_TYPE_MASK)?;
                let sequence = read_u64(&data[2..10]);
                let declared = u16::from_be_bytes([data[10], data[11]]) as usize;
                let available = data.len() - DATA_HEADER_SIZE;
                if declared > available {
                    return Err(FrameError::PayloadOverflow {
                        declared,
                        available,
                    });
                }

                Ok(Self::Data {
                    reliable: flags & FLAG_RELIABLE != 0,
                    body_type: BodyType::from_bits((flags & BODY_TYPE_MASK) >> BODY_TYPE_SHIFT),
                    sequence,
                    payload: data[DATA_HEADER_SIZE..DATA_HEADER_SIZE + declared].to_vec(),
                })
            }
            FrameType::Ack => {
                require(data, ACK_SIZE)?;
                let flags = data[1];
                check_flags(flags, FLAG_RELIABLE)?;
                Ok(Self::Ack {
                    reliable: flags & FLAG_RELIABLE != 0,
                    sequence: read_u64(&data[2..10]),
                })
            }
            FrameType::Ping => {
                require(data, PING_SIZE)?;
                Ok(Self::Ping {
                    nonce: read_u64(&data[1..9]),
                })
            }
            FrameType::Pong => {
                require(data, PING_SIZE)?;
                Ok(Self::Pong {
                    nonce: read_u64(&data[1..9]),
                })
            }
        }
    }
}

fn reliable_flag(reliable: bool) -> u8 {
    if reliable { FLAG_RELIABLE } else { 0 }
}

fn require(data: &[u8], expected: usize) -> Result<(), FrameError> {
    if data.len() < expected {
        return Err(FrameError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn check_flags(flags: u8, allowed: u8) -> Result<(), FrameError> {
    if flags & !allowed != 0 {
        return Err(FrameError::InvalidFlags(flags));
    }
    Ok(())
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_layout() {
        let frame = Frame::Data {
            reliable: true,
            body_type: BodyType::PartialEnd,
            sequence: 0x0102_0304_0506_0708,
            payload: vec![0xAA, 0xBB],
        };
        let bytes = frame.encode();

        assert_eq!(
            bytes,
            [0x01, 0b0000_0111, 1, 2, 3, 4, 5, 6, 7, 8, 0x00, 0x02, 0xAA, 0xBB]
        );
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_ack_and_ping_frames() {
        for frame in [
            Frame::Ack {
                reliable: false,
                sequence: 42,
            },
            Frame::Ack {
                reliable: true,
                sequence: u64::MAX,
            },
            Frame::Ping { nonce: 7 },
            Frame::Pong { nonce: 7 },
        ] {
            assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }

        assert_eq!(Frame::Ack { reliable: true, sequence: 1 }.encode().len(), ACK_SIZE);
        assert_eq!(Frame::Ping { nonce: 1 }.encode().len(), PING_SIZE);
    }

    #[test]
    fn test_every_body_type_survives() {
        for body_type in [
            BodyType::Complete,
            BodyType::PartialStart,
            BodyType::PartialMiddle,
            BodyType::PartialEnd,
        ] {
            let frame = Frame::Data {
                reliable: false,
                body_type,
                sequence: 1,
                payload: Vec::new(),
            };
            assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert_eq!(
            Frame::decode(&[0x03, 0, 0]),
            Err(FrameError::InvalidFrameType(0x03))
        );
        assert!(matches!(
            Frame::decode(&[]),
            Err(FrameError::TooShort { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = Frame::Ack {
            reliable: true,
            sequence: 9,
        }
        .encode();
        assert_eq!(
            Frame::decode(&bytes[..9]),
            Err(FrameError::TooShort {
                expected: ACK_SIZE,
                actual: 9
            })
        );

        let mut data = Frame::Data {
            reliable: true,
            body_type: BodyType::Complete,
            sequence: 1,
            payload: vec![1, 2, 3],
        }
        .encode();
        data.truncate(DATA_HEADER_SIZE + 1);
        assert_eq!(
            Frame::decode(&data),
            Err(FrameError::PayloadOverflow {
                declared: 3,
                available: 1
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_flags() {
        let mut bytes = Frame::Ack {
            reliable: false,
            sequence: 1,
        }
        .encode();
        bytes[1] = 0b1000_0000;
        assert_eq!(Frame::decode(&bytes), Err(FrameError::InvalidFlags(0b1000_0000)));
    }
}
