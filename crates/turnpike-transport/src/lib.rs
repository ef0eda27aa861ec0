//! # Turnpike Transport
//!
//! Datagram transport layer for Turnpike.
//!
//! This crate provides:
//! - The `Transport` trait abstracting a bound datagram socket
//! - A Tokio UDP implementation with statistics and bounded datagram size
//! - A factory so higher layers can recreate their local socket on demand
//! - A dispatcher owning the single receive loop of a socket and fanning
//!   datagrams out to registered observers over bounded channels

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod factory;
pub mod transport;
pub mod udp_async;

pub use dispatcher::{Datagram, Dispatcher, ObserverId};
pub use factory::{TransportFactory, UdpTransportFactory};
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::AsyncUdpTransport;

/// Largest datagram accepted by `send_to` unless configured otherwise.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1500;

/// Receive buffer size used by the dispatcher loop.
pub const RECV_BUFFER_SIZE: usize = 65536;
