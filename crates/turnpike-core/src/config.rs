//! Segment transport configuration

use std::time::Duration;

/// Default for [`TransportConfig::max_sequence_lag`]
pub const DEFAULT_MAX_SEQUENCE_LAG: u64 = 1000;

/// Segment transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest payload carried by one segment
    pub max_segment_size: usize,

    /// Unacknowledged segments allowed before `send` pushes back
    pub window: usize,

    /// Largest distance between the oldest unacknowledged sequence and the
    /// next one before `send` pushes back. The reliable receiver refuses
    /// segments further than this past its next expected sequence.
    pub max_sequence_lag: u64,

    /// RTT samples averaged for the loss timeout
    pub rtt_history: usize,

    /// RTT assumed before the first sample
    pub initial_rtt: Duration,

    /// Loss scans run every `loss_scan_segments / rate` seconds
    pub loss_scan_segments: f64,

    /// Bounds on the loss scan interval
    pub loss_scan_bounds: (Duration, Duration),

    /// Capacity of the delivered-message queue
    pub delivery_queue: usize,

    /// Send-rate controller
    pub congestion: CongestionConfig,

    /// Connection liveness
    pub liveness: LivenessConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 1300,
            window: 100,
            max_sequence_lag: DEFAULT_MAX_SEQUENCE_LAG,
            rtt_history: 50,
            initial_rtt: Duration::from_millis(200),
            loss_scan_segments: 10.0,
            loss_scan_bounds: (Duration::from_millis(10), Duration::from_secs(1)),
            delivery_queue: 256,
            congestion: CongestionConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

/// Send-rate controller thresholds. Rates are in segments per second.
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    /// Rate floor
    pub min_rate: f64,

    /// Rate ceiling
    pub max_rate: f64,

    /// A single sample above this ends the initial ramp
    pub initial_loss_threshold: f64,

    /// Average loss above this lowers the rate
    pub loss_threshold: f64,

    /// Average loss at or below this allows an increase
    pub recovery_threshold: f64,

    /// Queue occupancy above this is required for an increase
    pub occupancy_threshold: f64,

    /// Loss samples averaged
    pub loss_window: usize,

    /// Bisection bounds closer than this fraction of the low bound count
    /// as converged
    pub convergence: f64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            min_rate: 100.0,
            max_rate: 100_000.0,
            initial_loss_threshold: 0.10,
            loss_threshold: 0.04,
            recovery_threshold: 0.02,
            occupancy_threshold: 0.60,
            loss_window: 20,
            convergence: 0.05,
        }
    }
}

/// Ping and reconnect timing
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Scheduler period
    pub tick: Duration,

    /// Quiet time on an active connection before it is pinged
    pub ping_interval: Duration,

    /// Wait for a pong before the connection goes inactive
    pub ping_timeout: Duration,

    /// Time an inactive connection has to come back before removal
    pub reconnect_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(3),
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_segment_size, 1300);
        assert_eq!(config.window, 100);
        assert_eq!(config.max_sequence_lag, 1000);
        assert_eq!(config.rtt_history, 50);
    }

    #[test]
    fn test_congestion_defaults() {
        let config = CongestionConfig::default();
        assert_eq!(config.min_rate, 100.0);
        assert_eq!(config.initial_loss_threshold, 0.10);
        assert_eq!(config.loss_threshold, 0.04);
        assert_eq!(config.recovery_threshold, 0.02);
        assert_eq!(config.occupancy_threshold, 0.60);
        assert_eq!(config.loss_window, 20);
    }
}
