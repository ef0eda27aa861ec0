//! STUN/TURN attributes (RFC 5389 Section 15, RFC 5766 Section 14).
//!
//! Each attribute is a TLV: 16-bit type, 16-bit unpadded value length, the
//! value, then zero padding up to the next 4-byte boundary. Padding is part
//! of the wire size but never of the length field.

use super::MAGIC_COOKIE;
use super::error::StunError;
use super::message::TransactionId;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// MAPPED-ADDRESS
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
/// USERNAME
pub const ATTR_USERNAME: u16 = 0x0006;
/// MESSAGE-INTEGRITY
pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
/// ERROR-CODE
pub const ATTR_ERROR_CODE: u16 = 0x0009;
/// CHANNEL-NUMBER
pub const ATTR_CHANNEL_NUMBER: u16 = 0x000C;
/// LIFETIME
pub const ATTR_LIFETIME: u16 = 0x000D;
/// XOR-PEER-ADDRESS
pub const ATTR_XOR_PEER_ADDRESS: u16 = 0x0012;
/// DATA
pub const ATTR_DATA: u16 = 0x0013;
/// REALM
pub const ATTR_REALM: u16 = 0x0014;
/// NONCE
pub const ATTR_NONCE: u16 = 0x0015;
/// XOR-RELAYED-ADDRESS
pub const ATTR_XOR_RELAYED_ADDRESS: u16 = 0x0016;
/// REQUESTED-TRANSPORT
pub const ATTR_REQUESTED_TRANSPORT: u16 = 0x0019;
/// DONT-FRAGMENT
pub const ATTR_DONT_FRAGMENT: u16 = 0x001A;
/// XOR-MAPPED-ADDRESS
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// SOFTWARE
pub const ATTR_SOFTWARE: u16 = 0x8022;

/// IANA protocol number for UDP, used in REQUESTED-TRANSPORT
pub const TRANSPORT_UDP: u8 = 17;

/// Size of an encoded MESSAGE-INTEGRITY attribute (4 header + 20 HMAC)
pub const MESSAGE_INTEGRITY_SIZE: usize = 24;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// STUN/TURN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// MAPPED-ADDRESS (0x0001)
    MappedAddress(SocketAddr),
    /// XOR-MAPPED-ADDRESS (0x0020): server-reflexive address
    XorMappedAddress(SocketAddr),
    /// XOR-RELAYED-ADDRESS (0x0016): relayed transport address
    XorRelayedAddress(SocketAddr),
    /// XOR-PEER-ADDRESS (0x0012)
    XorPeerAddress(SocketAddr),
    /// USERNAME (0x0006)
    Username(String),
    /// MESSAGE-INTEGRITY (0x0008): HMAC-SHA1
    MessageIntegrity([u8; 20]),
    /// ERROR-CODE (0x0009)
    ErrorCode {
        /// Numeric code, 300-699
        code: u16,
        /// Server-supplied reason phrase
        reason: String,
    },
    /// REALM (0x0014)
    Realm(String),
    /// NONCE (0x0015)
    Nonce(String),
    /// LIFETIME (0x000D) in seconds
    Lifetime(u32),
    /// REQUESTED-TRANSPORT (0x0019) protocol number
    RequestedTransport(u8),
    /// DONT-FRAGMENT (0x001A), no value
    DontFragment,
    /// CHANNEL-NUMBER (0x000C)
    ChannelNumber(u16),
    /// DATA (0x0013)
    Data(Vec<u8>),
    /// SOFTWARE (0x8022)
    Software(String),
    /// Attribute this codec does not interpret, kept verbatim
    Unknown(u16, Vec<u8>),
}

impl StunAttribute {
    /// Attribute type code
    #[must_use]
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => ATTR_MAPPED_ADDRESS,
            Self::XorMappedAddress(_) => ATTR_XOR_MAPPED_ADDRESS,
            Self::XorRelayedAddress(_) => ATTR_XOR_RELAYED_ADDRESS,
            Self::XorPeerAddress(_) => ATTR_XOR_PEER_ADDRESS,
            Self::Username(_) => ATTR_USERNAME,
            Self::MessageIntegrity(_) => ATTR_MESSAGE_INTEGRITY,
            Self::ErrorCode { .. } => ATTR_ERROR_CODE,
            Self::Realm(_) => ATTR_REALM,
            Self::Nonce(_) => ATTR_NONCE,
            Self::Lifetime(_) => ATTR_LIFETIME,
            Self::RequestedTransport(_) => ATTR_REQUESTED_TRANSPORT,
            Self::DontFragment => ATTR_DONT_FRAGMENT,
            Self::ChannelNumber(_) => ATTR_CHANNEL_NUMBER,
            Self::Data(_) => ATTR_DATA,
            Self::Software(_) => ATTR_SOFTWARE,
            Self::Unknown(t, _) => *t,
        }
    }

    /// Append the encoded attribute (header, value, padding) to `out`.
    pub fn encode_into(&self, transaction_id: &TransactionId, out: &mut Vec<u8>) {
        let value = self.encode_value(transaction_id);

        out.extend_from_slice(&self.attr_type().to_be_bytes());
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(&value);
        out.extend(std::iter::repeat_n(0, padding(value.len())));
    }

    /// Wire size including header and padding
    #[must_use]
    pub fn encoded_len(&self, transaction_id: &TransactionId) -> usize {
        let len = self.encode_value(transaction_id).len();
        4 + len + padding(len)
    }

    fn encode_value(&self, transaction_id: &TransactionId) -> Vec<u8> {
        match self {
            Self::MappedAddress(addr) => encode_address(*addr),
            Self::XorMappedAddress(addr)
            | Self::XorRelayedAddress(addr)
            | Self::XorPeerAddress(addr) => encode_address(xor_address(*addr, transaction_id)),
            Self::Username(s) | Self::Realm(s) | Self::Nonce(s) | Self::Software(s) => {
                s.as_bytes().to_vec()
            }
            Self::MessageIntegrity(hmac) => hmac.to_vec(),
            Self::ErrorCode { code, reason } => {
                let mut value = vec![0, 0, (code / 100) as u8, (code % 100) as u8];
                value.extend_from_slice(reason.as_bytes());
                value
            }
            Self::Lifetime(secs) => secs.to_be_bytes().to_vec(),
            Self::RequestedTransport(protocol) => vec![*protocol, 0, 0, 0],
            Self::DontFragment => Vec::new(),
            Self::ChannelNumber(channel) => {
                let mut value = channel.to_be_bytes().to_vec();
                value.extend_from_slice(&[0, 0]);
                value
            }
            Self::Data(data) | Self::Unknown(_, data) => data.clone(),
        }
    }

    /// Decode an attribute value.
    ///
    /// # Errors
    ///
    /// Returns `StunError::InvalidAttribute` if the value does not have the
    /// shape its type requires.
    pub fn decode(
        attr_type: u16,
        value: &[u8],
        transaction_id: &TransactionId,
    ) -> Result<Self, StunError> {
        let invalid = || StunError::InvalidAttribute(attr_type);
        let text = |v: &[u8]| String::from_utf8(v.to_vec()).map_err(|_| invalid());

        let attr = match attr_type {
            ATTR_MAPPED_ADDRESS => Self::MappedAddress(decode_address(attr_type, value)?),
            ATTR_XOR_MAPPED_ADDRESS => Self::XorMappedAddress(xor_address(
                decode_address(attr_type, value)?,
                transaction_id,
            )),
            ATTR_XOR_RELAYED_ADDRESS => Self::XorRelayedAddress(xor_address(
                decode_address(attr_type, value)?,
                transaction_id,
            )),
            ATTR_XOR_PEER_ADDRESS => Self::XorPeerAddress(xor_address(
                decode_address(attr_type, value)?,
                transaction_id,
            )),
            ATTR_USERNAME => Self::Username(text(value)?),
            ATTR_REALM => Self::Realm(text(value)?),
            ATTR_NONCE => Self::Nonce(text(value)?),
            ATTR_SOFTWARE => Self::Software(text(value)?),
            ATTR_MESSAGE_INTEGRITY => {
                let hmac: [u8; 20] = value.try_into().map_err(|_| invalid())?;
                Self::MessageIntegrity(hmac)
            }
            ATTR_ERROR_CODE => {
                if value.len() < 4 {
                    return Err(invalid());
                }
                let class = u16::from(value[2] & 0x07);
                let number = u16::from(value[3]);
                if number > 99 {
                    return Err(invalid());
                }
                Self::ErrorCode {
                    code: class * 100 + number,
                    reason: text(&value[4..])?,
                }
            }
            ATTR_LIFETIME => {
                let secs: [u8; 4] = value.try_into().map_err(|_| invalid())?;
                Self::Lifetime(u32::from_be_bytes(secs))
            }
            ATTR_REQUESTED_TRANSPORT => {
                if value.len() != 4 {
                    return Err(invalid());
                }
                Self::RequestedTransport(value[0])
            }
            ATTR_DONT_FRAGMENT => {
                if !value.is_empty() {
                    return Err(invalid());
                }
                Self::DontFragment
            }
            ATTR_CHANNEL_NUMBER => {
                if value.len() != 4 {
                    return Err(invalid());
                }
                Self::ChannelNumber(u16::from_be_bytes([value[0], value[1]]))
            }
            ATTR_DATA => Self::Data(value.to_vec()),
            _ => Self::Unknown(attr_type, value.to_vec()),
        };

        Ok(attr)
    }
}

/// Zero bytes needed after a value of `len` bytes
#[must_use]
pub fn padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Apply the XOR-ADDRESS transform (RFC 5389 Section 15.2).
///
/// The port is XORed with the high 16 bits of the magic cookie. An IPv4
/// address is XORed with the cookie; an IPv6 address with the cookie
/// followed by the transaction id. The transform is its own inverse.
#[must_use]
pub fn xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> SocketAddr {
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let magic_bytes = MAGIC_COOKIE.to_be_bytes();

    let ip = match addr.ip() {
        IpAddr::V4(ipv4) => {
            let mut octets = ipv4.octets();
            for (octet, key) in octets.iter_mut().zip(magic_bytes) {
                *octet ^= key;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(ipv6) => {
            let mut octets = ipv6.octets();
            let key = magic_bytes.iter().chain(transaction_id.as_bytes());
            for (octet, key) in octets.iter_mut().zip(key) {
                *octet ^= key;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    SocketAddr::new(ip, port)
}

fn encode_address(addr: SocketAddr) -> Vec<u8> {
    let mut value = Vec::with_capacity(20);
    value.push(0); // Reserved
    match addr.ip() {
        IpAddr::V4(ipv4) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ipv4.octets());
        }
        IpAddr::V6(ipv6) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ipv6.octets());
        }
    }
    value
}

fn decode_address(attr_type: u16, value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidAttribute(attr_type));
    }

    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = match (value[1], value.len()) {
        (FAMILY_IPV4, 8) => {
            let octets: [u8; 4] = value[4..8]
                .try_into()
                .map_err(|_| StunError::InvalidAttribute(attr_type))?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        (FAMILY_IPV6, 20) => {
            let octets: [u8; 16] = value[4..20]
                .try_into()
                .map_err(|_| StunError::InvalidAttribute(attr_type))?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(StunError::InvalidAttribute(attr_type)),
    };

    Ok(SocketAddr::new(ip, port))
}
