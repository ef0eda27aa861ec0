//! STUN/TURN wire codec.
//!
//! Message header, TLV attributes with XOR-obfuscated addresses,
//! MESSAGE-INTEGRITY, and the ChannelData framing that shares the same
//! socket.

pub mod attribute;
pub mod channel_data;
pub mod error;
pub mod message;

pub use attribute::{StunAttribute, TRANSPORT_UDP, xor_address};
pub use channel_data::{ChannelData, MAX_CHANNEL, MIN_CHANNEL, is_channel_data, is_valid_channel};
pub use error::StunError;
pub use message::{StunClass, StunMessage, StunMethod, TransactionId};

/// STUN magic cookie (RFC 5389)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN header size in bytes
pub const HEADER_SIZE: usize = 20;
