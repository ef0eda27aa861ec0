//! TURN client (RFC 5766): request engine, allocation and channel-binding
//! lifecycle.

pub mod allocation;
pub mod credentials;
pub mod error;
pub mod operations;
pub mod socket;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_server;

pub use allocation::{Allocation, ChannelBinding, ChannelRegistry, Reservation};
pub use credentials::Credentials;
pub use error::TurnError;
pub use operations::{RelayedData, TurnOperations};
pub use socket::{Received, TurnSocket};
pub use transaction::PendingTransactions;
