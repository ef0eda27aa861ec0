//! Error types for the Turnpike segment transport.

use thiserror::Error;
use turnpike_relay::TurnError;

/// Core transport errors
#[derive(Debug, Error)]
pub enum Error {
    /// Frame parsing error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Send-side error
    #[error("send error: {0}")]
    Send(#[from] SendError),

    /// Relay error while writing a frame
    #[error("relay error: {0}")]
    Turn(#[from] TurnError),

    /// Frame sink no longer accepts frames
    #[error("frame sink closed")]
    SinkClosed,
}

/// Frame-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown frame type byte
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Flag bits outside the defined set
    #[error("invalid frame flags: 0b{0:08b}")]
    InvalidFlags(u8),

    /// Payload length exceeds the buffer
    #[error("payload length {declared} exceeds {available} available bytes")]
    PayloadOverflow {
        /// Length from the header
        declared: usize,
        /// Bytes following the header
        available: usize,
    },
}

/// Send-side errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Too many unacknowledged segments; back off and retry
    #[error("send window full: {outstanding} segments outstanding (window {window})")]
    WindowFull {
        /// Unacknowledged segments
        outstanding: usize,
        /// Configured window
        window: usize,
    },

    /// Oldest unacknowledged segment lags too far behind; back off and retry
    #[error("sequence lag {lag} exceeds {max}")]
    LagExceeded {
        /// Distance from the oldest unacknowledged sequence to the next one
        lag: u64,
        /// Configured maximum
        max: u64,
    },

    /// Sender has been closed
    #[error("sender closed")]
    Closed,
}

impl SendError {
    /// Whether the caller should wait and retry rather than give up
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::WindowFull { .. } | Self::LagExceeded { .. })
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
