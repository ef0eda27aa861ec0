//! # Turnpike Relay
//!
//! TURN client for the Turnpike peer transport.
//!
//! This crate provides:
//! - STUN/TURN message codec with XOR-obfuscated addresses and
//!   MESSAGE-INTEGRITY (long-term credentials)
//! - ChannelData framing and datagram demultiplexing
//! - A request/response engine with retransmission and bounded
//!   authentication retries
//! - `TurnSocket`, which owns one allocation and its channel bindings and
//!   keeps both refreshed in the background
//!
//! ## Example
//!
//! ```rust
//! use turnpike_relay::stun::{StunAttribute, StunMessage, StunMethod};
//!
//! let mut request = StunMessage::request(StunMethod::ChannelBind)
//!     .with_attribute(StunAttribute::ChannelNumber(0x4000))
//!     .with_attribute(StunAttribute::XorPeerAddress("192.0.2.1:5000".parse().unwrap()));
//! request.add_message_integrity(b"key");
//!
//! let decoded = StunMessage::decode(&request.encode()).unwrap();
//! assert!(decoded.verify_message_integrity(b"key").is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod config;
pub mod network;
pub mod stun;
pub mod timer;
pub mod turn;

pub use candidate::{CandidateProtocol, CandidateType, IceCandidate};
pub use config::TurnConfig;
pub use network::{NetworkMonitor, NetworkSignal};
pub use stun::{ChannelData, StunError, StunMessage};
pub use timer::ExpireTimer;
pub use turn::{Allocation, RelayedData, TurnError, TurnOperations, TurnSocket};
