//! ICE candidates derived from a TURN allocation.

use std::fmt;
use std::net::SocketAddr;

/// How a candidate was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    /// Local interface address
    Host,
    /// Public address seen by the server (XOR-MAPPED-ADDRESS)
    ServerReflexive,
    /// Discovered during connectivity checks
    PeerReflexive,
    /// Relayed address on the TURN server (XOR-RELAYED-ADDRESS)
    Relay,
}

impl CandidateType {
    /// Selection priority. Higher is preferred; relay candidates win since
    /// every peer session runs over the allocation.
    #[must_use]
    pub fn priority(self) -> u32 {
        match self {
            Self::Relay => 4,
            Self::ServerReflexive => 3,
            Self::PeerReflexive => 2,
            Self::Host => 1,
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::ServerReflexive => write!(f, "srflx"),
            Self::PeerReflexive => write!(f, "prflx"),
            Self::Relay => write!(f, "relay"),
        }
    }
}

/// Transport protocol of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateProtocol {
    /// UDP
    Udp,
}

impl fmt::Display for CandidateProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Candidate address
    pub address: SocketAddr,
    /// Candidate type
    pub candidate_type: CandidateType,
    /// Selection priority
    pub priority: u32,
    /// Transport protocol
    pub protocol: CandidateProtocol,
    /// Base address for reflexive and relayed candidates
    pub related_address: Option<SocketAddr>,
}

impl IceCandidate {
    fn new(address: SocketAddr, candidate_type: CandidateType, related: Option<SocketAddr>) -> Self {
        Self {
            address,
            candidate_type,
            priority: candidate_type.priority(),
            protocol: CandidateProtocol::Udp,
            related_address: related,
        }
    }

    /// Host candidate
    #[must_use]
    pub fn host(address: SocketAddr) -> Self {
        Self::new(address, CandidateType::Host, None)
    }

    /// Server-reflexive candidate with its local base
    #[must_use]
    pub fn server_reflexive(address: SocketAddr, base: Option<SocketAddr>) -> Self {
        Self::new(address, CandidateType::ServerReflexive, base)
    }

    /// Relay candidate, related to the server-reflexive address
    #[must_use]
    pub fn relay(address: SocketAddr, mapped: SocketAddr) -> Self {
        Self::new(address, CandidateType::Relay, Some(mapped))
    }

    /// Format as an SDP `candidate:` line.
    #[must_use]
    pub fn to_sdp_string(&self) -> String {
        let mut s = format!(
            "candidate:{} 1 {} {} {} {} typ {}",
            self.candidate_type.priority(),
            self.protocol,
            self.priority,
            self.address.ip(),
            self.address.port(),
            self.candidate_type
        );

        if let Some(related) = self.related_address {
            s.push_str(&format!(" raddr {} rport {}", related.ip(), related.port()));
        }

        s
    }
}

/// Sort candidates, highest priority first.
pub fn sort_by_priority(candidates: &mut [IceCandidate]) {
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
}
