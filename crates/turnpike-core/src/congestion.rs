//! Send-rate controller.
//!
//! Two phases. `InitialStart` doubles a power-of-two multiplier over the
//! floor rate while loss stays low and the send window is busy. The first
//! significant loss brackets the rate between half and the current value and
//! switches to `MidByMid`, which bisects that bracket: sustained loss moves
//! the upper bound down, clean busy periods move the lower bound up.
//!
//! The controller is a plain state machine fed one loss sample per loss scan;
//! the owner serialises access.

use std::collections::VecDeque;

use crate::config::CongestionConfig;

/// Controller phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Multiplicative ramp from the floor rate
    InitialStart,
    /// Bisection between a lower and upper bound
    MidByMid,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitialStart => write!(f, "initial-start"),
            Self::MidByMid => write!(f, "mid-by-mid"),
        }
    }
}

/// Send-rate controller. Rates are segments per second.
#[derive(Debug, Clone)]
pub struct CongestionController {
    config: CongestionConfig,
    phase: Phase,
    rate: f64,
    multiplier: f64,
    low: f64,
    high: f64,
    samples: VecDeque<f64>,
}

impl CongestionController {
    /// Start in `InitialStart` at the floor rate
    #[must_use]
    pub fn new(config: CongestionConfig) -> Self {
        let rate = config.min_rate;
        Self {
            samples: VecDeque::with_capacity(config.loss_window),
            config,
            phase: Phase::InitialStart,
            rate,
            multiplier: 1.0,
            low: rate,
            high: rate,
        }
    }

    /// Current rate
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bisection bounds `(low, high)`
    #[must_use]
    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    /// Average of the retained loss samples, 0 when there are none
    #[must_use]
    pub fn average_loss(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    /// Feed one loss ratio together with the send-window occupancy (both in
    /// `[0, 1]`). Returns true when the rate changed.
    pub fn on_loss_sample(&mut self, loss: f64, occupancy: f64) -> bool {
        if self.samples.len() == self.config.loss_window.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(loss);
        let average = self.average_loss();
        let busy = occupancy > self.config.occupancy_threshold;
        let before = self.rate;

        match self.phase {
            Phase::InitialStart => {
                if loss > self.config.initial_loss_threshold
                    || average > self.config.loss_threshold
                {
                    self.high = self.rate;
                    self.low = (self.rate / 2.0).max(self.config.min_rate);
                    self.phase = Phase::MidByMid;
                    self.set_rate(self.low);
                    tracing::debug!(
                        low = self.low,
                        high = self.high,
                        loss,
                        average,
                        "loss detected, switching to bisection"
                    );
                } else if busy && self.rate < self.config.max_rate {
                    self.multiplier *= 2.0;
                    self.set_rate(self.config.min_rate * self.multiplier);
                }
            }
            Phase::MidByMid => {
                if average > self.config.loss_threshold {
                    self.high = self.rate;
                    if self.low >= self.high {
                        self.low = (self.high / 2.0).max(self.config.min_rate);
                    }
                    self.set_rate((self.low + self.high) / 2.0);
                } else if average <= self.config.recovery_threshold && busy {
                    self.low = self.rate;
                    if self.high - self.low <= self.config.convergence * self.low {
                        self.high = (self.high * 2.0).min(self.config.max_rate);
                    }
                    self.set_rate((self.low + self.high) / 2.0);
                }
            }
        }

        let changed = (self.rate - before).abs() > f64::EPSILON;
        if changed {
            self.samples.clear();
            tracing::trace!(phase = %self.phase, from = before, to = self.rate, "send rate changed");
        }
        changed
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate.clamp(self.config.min_rate, self.config.max_rate);
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new(CongestionConfig::default())
    }
}
