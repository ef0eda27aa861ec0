//! STUN/TURN message header and body codec (RFC 5389 Section 6).

use super::attribute::{ATTR_MESSAGE_INTEGRITY, MESSAGE_INTEGRITY_SIZE, StunAttribute, padding};
use super::error::StunError;
use super::{HEADER_SIZE, MAGIC_COOKIE};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::fmt;
use std::net::SocketAddr;

type HmacSha1 = Hmac<Sha1>;

/// STUN/TURN method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StunMethod {
    /// Binding (0x001)
    Binding,
    /// Allocate (0x003)
    Allocate,
    /// Refresh (0x004)
    Refresh,
    /// Send (0x006), indication only
    Send,
    /// Data (0x007), indication only
    Data,
    /// CreatePermission (0x008)
    CreatePermission,
    /// ChannelBind (0x009)
    ChannelBind,
}

impl StunMethod {
    /// 12-bit method number
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Binding => 0x001,
            Self::Allocate => 0x003,
            Self::Refresh => 0x004,
            Self::Send => 0x006,
            Self::Data => 0x007,
            Self::CreatePermission => 0x008,
            Self::ChannelBind => 0x009,
        }
    }

    /// Look up a method by number.
    ///
    /// # Errors
    ///
    /// Returns `StunError::UnknownMethod` for methods this codec does not use.
    pub fn from_code(code: u16) -> Result<Self, StunError> {
        Ok(match code {
            0x001 => Self::Binding,
            0x003 => Self::Allocate,
            0x004 => Self::Refresh,
            0x006 => Self::Send,
            0x007 => Self::Data,
            0x008 => Self::CreatePermission,
            0x009 => Self::ChannelBind,
            other => return Err(StunError::UnknownMethod(other)),
        })
    }
}

/// Message class, carried in bits C0/C1 of the message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StunClass {
    /// Request (0b00)
    Request,
    /// Indication (0b01)
    Indication,
    /// Success response (0b10)
    SuccessResponse,
    /// Error response (0b11)
    ErrorResponse,
}

impl StunClass {
    fn bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::SuccessResponse => 0b10,
            Self::ErrorResponse => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        }
    }

    /// Whether this class answers a request
    #[must_use]
    pub fn is_response(self) -> bool {
        matches!(self, Self::SuccessResponse | Self::ErrorResponse)
    }
}

/// Interleave method and class bits into the 14-bit message type.
///
/// ```text
///  0                 1
///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
/// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[must_use]
pub fn encode_message_type(method: StunMethod, class: StunClass) -> u16 {
    let m = method.code();
    let c = class.bits();

    (m & 0x000F) | ((c & 0b01) << 4) | ((m & 0x0070) << 1) | ((c & 0b10) << 7) | ((m & 0x0F80) << 2)
}

/// Split a message type into method and class.
///
/// # Errors
///
/// Returns `StunError::UnknownMethod` if the method is not one of `StunMethod`.
pub fn decode_message_type(msg_type: u16) -> Result<(StunMethod, StunClass), StunError> {
    let class = StunClass::from_bits(((msg_type >> 4) & 0x01) | ((msg_type >> 7) & 0x02));
    let method = (msg_type & 0x000F) | ((msg_type >> 1) & 0x0070) | ((msg_type >> 2) & 0x0F80);

    Ok((StunMethod::from_code(method)?, class))
}

/// 96-bit transaction identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Fresh random id
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({self})")
    }
}

/// STUN/TURN message
///
/// # Examples
///
/// ```
/// use turnpike_relay::stun::{StunAttribute, StunClass, StunMessage, StunMethod};
///
/// let request = StunMessage::request(StunMethod::Allocate)
///     .with_attribute(StunAttribute::Lifetime(600));
/// let bytes = request.encode();
/// assert_eq!(bytes.len() % 4, 0);
///
/// let decoded = StunMessage::decode(&bytes).unwrap();
/// assert_eq!(decoded, request);
/// assert_eq!(decoded.class, StunClass::Request);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Method
    pub method: StunMethod,
    /// Class
    pub class: StunClass,
    /// Transaction id
    pub transaction_id: TransactionId,
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create an empty message with a random transaction id.
    #[must_use]
    pub fn new(method: StunMethod, class: StunClass) -> Self {
        Self {
            method,
            class,
            transaction_id: TransactionId::random(),
            attributes: Vec::new(),
        }
    }

    /// Create an empty request.
    #[must_use]
    pub fn request(method: StunMethod) -> Self {
        Self::new(method, StunClass::Request)
    }

    /// Create a response to `request`, reusing its transaction id.
    #[must_use]
    pub fn response_to(request: &StunMessage, class: StunClass) -> Self {
        Self {
            method: request.method,
            class,
            transaction_id: request.transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Append an attribute (builder style).
    #[must_use]
    pub fn with_attribute(mut self, attr: StunAttribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Append an attribute.
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Encode to wire format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.encode_header(0);
        for attr in &self.attributes {
            attr.encode_into(&self.transaction_id, &mut bytes);
        }
        let length = bytes.len() - HEADER_SIZE;
        set_length(&mut bytes, length);
        bytes
    }

    /// Decode from wire format.
    ///
    /// Rejects buffers shorter than a header, not 4-byte aligned, with
    /// non-zero leading bits, a wrong magic cookie, a length field that
    /// disagrees with the buffer, or an attribute running past the end.
    ///
    /// # Errors
    ///
    /// Returns the `StunError` describing the first violation found.
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::MessageTooShort(bytes.len()));
        }
        if bytes.len() % 4 != 0 {
            return Err(StunError::Misaligned(bytes.len()));
        }
        if bytes[0] & 0xC0 != 0 {
            return Err(StunError::InvalidLeadingBits);
        }

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        if cookie != MAGIC_COOKIE {
            return Err(StunError::InvalidMagicCookie(cookie));
        }
        if declared != bytes.len() - HEADER_SIZE {
            return Err(StunError::LengthMismatch {
                declared,
                actual: bytes.len() - HEADER_SIZE,
            });
        }

        let (method, class) = decode_message_type(msg_type)?;

        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes[8..HEADER_SIZE]);
        let transaction_id = TransactionId(id);

        let mut attributes = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset < bytes.len() {
            if offset + 4 > bytes.len() {
                return Err(StunError::TruncatedAttribute(0));
            }
            let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let attr_len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            offset += 4;

            let end = offset + attr_len;
            if end + padding(attr_len) > bytes.len() {
                return Err(StunError::TruncatedAttribute(attr_type));
            }

            attributes.push(StunAttribute::decode(
                attr_type,
                &bytes[offset..end],
                &transaction_id,
            )?);
            offset = end + padding(attr_len);
        }

        Ok(Self {
            method,
            class,
            transaction_id,
            attributes,
        })
    }

    /// Append MESSAGE-INTEGRITY computed with `key`.
    ///
    /// The HMAC-SHA1 covers the message as encoded so far, with the header
    /// length already counting the 24-byte integrity attribute. Any earlier
    /// MESSAGE-INTEGRITY is replaced.
    pub fn add_message_integrity(&mut self, key: &[u8]) {
        self.attributes
            .retain(|attr| !matches!(attr, StunAttribute::MessageIntegrity(_)));

        let hmac = self.compute_integrity(self.attributes.len(), key);
        self.attributes.push(StunAttribute::MessageIntegrity(hmac));
    }

    /// Check MESSAGE-INTEGRITY against `key`.
    ///
    /// # Errors
    ///
    /// Returns `StunError::MissingAttribute` if the message carries no
    /// MESSAGE-INTEGRITY, `StunError::IntegrityMismatch` if it does not verify.
    pub fn verify_message_integrity(&self, key: &[u8]) -> Result<(), StunError> {
        let (index, expected) = self
            .attributes
            .iter()
            .enumerate()
            .find_map(|(i, attr)| match attr {
                StunAttribute::MessageIntegrity(hmac) => Some((i, *hmac)),
                _ => None,
            })
            .ok_or(StunError::MissingAttribute("MESSAGE-INTEGRITY"))?;

        // verify_slice compares in constant time
        self.integrity_mac(index, key)
            .verify_slice(&expected)
            .map_err(|_| StunError::IntegrityMismatch)
    }

    /// Whether a MESSAGE-INTEGRITY attribute is present
    #[must_use]
    pub fn has_message_integrity(&self) -> bool {
        self.find(ATTR_MESSAGE_INTEGRITY).is_some()
    }

    fn compute_integrity(&self, upto: usize, key: &[u8]) -> [u8; 20] {
        self.integrity_mac(upto, key).finalize().into_bytes().into()
    }

    fn integrity_mac(&self, upto: usize, key: &[u8]) -> HmacSha1 {
        let mut bytes = self.encode_header(0);
        for attr in &self.attributes[..upto] {
            attr.encode_into(&self.transaction_id, &mut bytes);
        }
        let length = bytes.len() - HEADER_SIZE + MESSAGE_INTEGRITY_SIZE;
        set_length(&mut bytes, length);

        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(&bytes);
        mac
    }

    fn encode_header(&self, length: u16) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + 64);
        bytes.extend_from_slice(&encode_message_type(self.method, self.class).to_be_bytes());
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(self.transaction_id.as_bytes());
        bytes
    }

    fn find(&self, attr_type: u16) -> Option<&StunAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    /// XOR-MAPPED-ADDRESS value
    #[must_use]
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// XOR-RELAYED-ADDRESS value
    #[must_use]
    pub fn xor_relayed_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::XorRelayedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// XOR-PEER-ADDRESS value
    #[must_use]
    pub fn xor_peer_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::XorPeerAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// LIFETIME value in seconds
    #[must_use]
    pub fn lifetime(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Lifetime(secs) => Some(*secs),
            _ => None,
        })
    }

    /// ERROR-CODE as `(code, reason)`
    #[must_use]
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::ErrorCode { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }

    /// REALM value
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Realm(realm) => Some(realm.as_str()),
            _ => None,
        })
    }

    /// NONCE value
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Nonce(nonce) => Some(nonce.as_str()),
            _ => None,
        })
    }

    /// CHANNEL-NUMBER value
    #[must_use]
    pub fn channel_number(&self) -> Option<u16> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::ChannelNumber(channel) => Some(*channel),
            _ => None,
        })
    }

    /// DATA value
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Data(data) => Some(data.as_slice()),
            _ => None,
        })
    }
}

fn set_length(bytes: &mut [u8], length: usize) {
    bytes[2..4].copy_from_slice(&(length as u16).to_be_bytes());
}
