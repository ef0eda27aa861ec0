//! STUN decode and validation errors.

use thiserror::Error;

/// STUN/TURN wire-format errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StunError {
    /// Fewer bytes than a header
    #[error("STUN message too short: {0} bytes")]
    MessageTooShort(usize),

    /// Total length is not a multiple of 4
    #[error("STUN message length {0} is not 4-byte aligned")]
    Misaligned(usize),

    /// Leading two bits of the message type are not zero
    #[error("STUN message has non-zero leading bits")]
    InvalidLeadingBits,

    /// Invalid magic cookie
    #[error("invalid STUN magic cookie: 0x{0:08X}")]
    InvalidMagicCookie(u32),

    /// Header length field disagrees with the buffer
    #[error("STUN length field {declared} does not match {actual} attribute bytes")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Attribute bytes actually present
        actual: usize,
    },

    /// Unsupported method
    #[error("unknown STUN method: 0x{0:03X}")]
    UnknownMethod(u16),

    /// Attribute value is malformed
    #[error("invalid STUN attribute 0x{0:04X}")]
    InvalidAttribute(u16),

    /// Attribute runs past the end of the message
    #[error("truncated STUN attribute 0x{0:04X}")]
    TruncatedAttribute(u16),

    /// Required attribute is absent
    #[error("missing STUN attribute: {0}")]
    MissingAttribute(&'static str),

    /// MESSAGE-INTEGRITY did not verify
    #[error("MESSAGE-INTEGRITY verification failed")]
    IntegrityMismatch,

    /// Channel number outside 0x4000-0x7FFF
    #[error("invalid channel number: 0x{0:04X}")]
    InvalidChannel(u16),

    /// Channel data shorter than its length field
    #[error("truncated channel data: declared {declared}, available {available}")]
    TruncatedChannelData {
        /// Length from the channel-data header
        declared: usize,
        /// Bytes following the header
        available: usize,
    },
}
