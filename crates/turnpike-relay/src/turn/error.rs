//! TURN request failures.

use crate::stun::StunError;
use std::net::SocketAddr;
use thiserror::Error;
use turnpike_transport::TransportError;

/// Failure of a TURN operation
#[derive(Debug, Error)]
pub enum TurnError {
    /// No response within the retransmission budget
    #[error("TURN server unreachable after {attempts} attempts")]
    ServerUnreachable {
        /// Sends made, including the first
        attempts: u32,
    },

    /// 400 Bad Request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 401 Unauthorized, with the challenge to answer
    #[error("unauthorized (realm {realm:?})")]
    Unauthorized {
        /// REALM from the challenge
        realm: String,
        /// NONCE from the challenge
        nonce: String,
    },

    /// 437 Allocation Mismatch
    #[error("allocation mismatch")]
    AllocationMismatch,

    /// 438 Stale Nonce, with the replacement nonce
    #[error("stale nonce")]
    StaleNonce {
        /// Fresh NONCE
        nonce: String,
    },

    /// 441 Wrong Credentials
    #[error("wrong credentials")]
    WrongCredentials,

    /// 508 Insufficient Capacity
    #[error("insufficient capacity")]
    InsufficientCapacity,

    /// Any other error response
    #[error("TURN error {code}: {reason}")]
    Other {
        /// Numeric error code
        code: u16,
        /// Server-supplied reason phrase
        reason: String,
    },

    /// Success response lacks a required attribute
    #[error("response missing {0}")]
    MissingAttribute(&'static str),

    /// Response of an unexpected method or class
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// No enabled channel binding for the peer
    #[error("no channel binding for {0}")]
    NoBinding(SocketAddr),

    /// Operation needs an allocation and none exists
    #[error("no allocation")]
    NoAllocation,

    /// Every channel number is in use
    #[error("channel numbers exhausted")]
    ChannelsExhausted,

    /// Socket or operations engine already closed
    #[error("TURN client closed")]
    Closed,

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed message
    #[error("codec error: {0}")]
    Stun(#[from] StunError),
}

impl TurnError {
    /// Map an ERROR-CODE to a failure kind. `realm` and `nonce` come from
    /// the same error response.
    #[must_use]
    pub fn from_error_code(code: u16, reason: &str, realm: Option<&str>, nonce: Option<&str>) -> Self {
        match (code, nonce) {
            (400, _) => Self::BadRequest(reason.to_string()),
            (401, Some(nonce)) => Self::Unauthorized {
                realm: realm.unwrap_or_default().to_string(),
                nonce: nonce.to_string(),
            },
            (437, _) => Self::AllocationMismatch,
            (438, Some(nonce)) => Self::StaleNonce {
                nonce: nonce.to_string(),
            },
            (441, _) => Self::WrongCredentials,
            (508, _) => Self::InsufficientCapacity,
            _ => Self::Other {
                code,
                reason: reason.to_string(),
            },
        }
    }

    /// Whether the operation can be retried with updated realm/nonce
    #[must_use]
    pub fn is_auth_challenge(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::StaleNonce { .. })
    }

    /// Whether the allocation must be rebuilt from a fresh transport
    #[must_use]
    pub fn is_allocation_mismatch(&self) -> bool {
        matches!(self, Self::AllocationMismatch)
    }
}
