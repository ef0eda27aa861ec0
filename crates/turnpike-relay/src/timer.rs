//! Monotonic expiry countdown shared by allocations and channel bindings.

use std::time::Duration;
use tokio::time::Instant;

/// Countdown from the last reset.
///
/// Built on `tokio::time::Instant` so paused-clock tests can advance it.
#[derive(Debug, Clone)]
pub struct ExpireTimer {
    duration: Duration,
    margin: Duration,
    started: Instant,
}

impl ExpireTimer {
    /// Start a timer of `duration`. "Close to expiring" means the final
    /// fifth of the duration.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self::with_margin(duration, duration / 5)
    }

    /// Start a timer that reports close-to-expiry `margin` before the end.
    #[must_use]
    pub fn with_margin(duration: Duration, margin: Duration) -> Self {
        Self {
            duration,
            margin: margin.min(duration),
            started: Instant::now(),
        }
    }

    /// Time since the last reset
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the full duration has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.duration
    }

    /// Whether the remaining time is within the margin
    #[must_use]
    pub fn is_close_to_expiring(&self) -> bool {
        self.remaining() <= self.margin
    }

    /// Time left, zero once expired
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }

    /// Restart the countdown with the same duration.
    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    /// Restart the countdown with a new duration, keeping the margin ratio.
    pub fn reset_with(&mut self, duration: Duration) {
        *self = Self::new(duration);
    }

    /// Configured duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}
