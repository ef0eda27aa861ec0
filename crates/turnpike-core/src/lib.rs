//! # Turnpike Core
//!
//! Segment transport for Turnpike peer connections.
//!
//! This crate provides:
//! - A compact frame format for data segments, acknowledgments and pings
//! - Segmentation of application messages and in-order reassembly
//! - `SendLogic`, a paced sender with loss detection, retransmission on the
//!   reliable stream, and a two-phase rate controller
//! - `PeerConnection`, which runs a reliable and an unreliable stream to one
//!   peer over any `FrameSink` (a TURN channel in production)
//! - Connection liveness tracking driven by pings
//!
//! ## Example
//!
//! ```rust
//! use turnpike_core::receive::ReceiveLogic;
//! use turnpike_core::segment::split;
//!
//! let message = vec![7u8; 3000];
//! let mut receiver = ReceiveLogic::new(true);
//! let mut delivered = Vec::new();
//!
//! for (sequence, (body_type, chunk)) in split(&message, 1300).into_iter().enumerate() {
//!     delivered.extend(receiver.receive(sequence as u64, body_type, chunk).delivered);
//! }
//! assert_eq!(delivered, vec![message]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod frame;
pub mod liveness;
pub mod receive;
pub mod segment;
pub mod send;
pub mod sink;

pub use config::{CongestionConfig, LivenessConfig, TransportConfig};
pub use congestion::{CongestionController, Phase};
pub use connection::{ConnectionStats, Delivery, Incoming, PeerConnection};
pub use error::{Error, FrameError, Result, SendError};
pub use frame::Frame;
pub use liveness::{
    ConnectionRegistry, ConnectionState, LivenessEvent, LivenessHandle, LivenessMonitor,
};
pub use receive::{Receipt, ReceiveLogic};
pub use segment::BodyType;
pub use send::{SendLogic, SendState, SendStats};
pub use sink::{FrameSink, TurnPeerSink};
