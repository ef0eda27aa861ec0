//! Configuration file for the Turnpike CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use turnpike_core::{CongestionConfig, LivenessConfig, TransportConfig};
use turnpike_relay::TurnConfig;

/// Turnpike configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// TURN server and credentials
    #[serde(default)]
    pub turn: TurnSection,
    /// Segment transport tuning
    #[serde(default)]
    pub transport: TransportSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TURN server and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSection {
    /// Server as host:port
    #[serde(default = "default_server")]
    pub server: String,
    /// Long-term credential username
    #[serde(default)]
    pub username: String,
    /// Long-term credential password
    #[serde(default)]
    pub password: String,
    /// Local bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Response timeout per attempt
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retransmissions before the server counts as unreachable
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Requested allocation lifetime
    #[serde(default = "default_lifetime_secs")]
    pub allocation_lifetime_secs: u64,
    /// Channel binding lifetime
    #[serde(default = "default_lifetime_secs")]
    pub channel_lifetime_secs: u64,
    /// Ask the server to set DF on relayed packets
    #[serde(default)]
    pub dont_fragment: bool,
}

/// Segment transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Largest payload per segment
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: usize,
    /// Unacknowledged segments before sends push back
    #[serde(default = "default_window")]
    pub window: usize,
    /// Sequence lag before sends push back
    #[serde(default = "default_max_sequence_lag")]
    pub max_sequence_lag: u64,
    /// Send-rate floor in segments per second
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    /// Send-rate ceiling in segments per second
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    /// Quiet time before a peer is pinged
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Wait for a pong
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// Time an unresponsive peer has to return
    #[serde(default = "default_reconnect_timeout_secs")]
    pub reconnect_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_server() -> String {
    "127.0.0.1:3478".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_lifetime_secs() -> u64 {
    600
}

fn default_max_segment_size() -> usize {
    1300
}

fn default_window() -> usize {
    100
}

fn default_max_sequence_lag() -> u64 {
    1000
}

fn default_min_rate() -> f64 {
    100.0
}

fn default_max_rate() -> f64 {
    100_000.0
}

fn default_ping_interval_secs() -> u64 {
    5
}

fn default_ping_timeout_secs() -> u64 {
    3
}

fn default_reconnect_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TurnSection {
    fn default() -> Self {
        Self {
            server: default_server(),
            username: String::new(),
            password: String::new(),
            bind_addr: default_bind_addr(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            allocation_lifetime_secs: default_lifetime_secs(),
            channel_lifetime_secs: default_lifetime_secs(),
            dont_fragment: false,
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            max_segment_size: default_max_segment_size(),
            window: default_window(),
            max_sequence_lag: default_max_sequence_lag(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            reconnect_timeout_secs: default_reconnect_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;

        if self.turn.server.rsplit_once(':').is_none() {
            anyhow::bail!("TURN server '{}' missing port", self.turn.server);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        // Segments plus the 12-byte frame header and 4-byte channel header
        // must fit one datagram.
        if self.transport.max_segment_size == 0 || self.transport.max_segment_size > 1400 {
            anyhow::bail!("max_segment_size must be between 1 and 1400");
        }

        if self.transport.window == 0 {
            anyhow::bail!("window must be at least 1");
        }

        if self.transport.min_rate <= 0.0 || self.transport.max_rate < self.transport.min_rate {
            anyhow::bail!("send rates must satisfy 0 < min_rate <= max_rate");
        }

        Ok(())
    }

    /// Parse the local bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.turn.bind_addr.parse()?)
    }

    /// Resolve the TURN server name
    ///
    /// # Errors
    ///
    /// Returns an error if the name does not resolve.
    pub async fn resolve_server(&self) -> anyhow::Result<SocketAddr> {
        tokio::net::lookup_host(&self.turn.server)
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("TURN server '{}' did not resolve", self.turn.server))
    }

    /// TURN client settings for an already resolved server
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid.
    pub fn turn_config(&self, server: SocketAddr) -> anyhow::Result<TurnConfig> {
        Ok(TurnConfig {
            bind_addr: self.bind_addr()?,
            request_timeout: Duration::from_millis(self.turn.request_timeout_ms),
            max_retries: self.turn.max_retries,
            allocation_lifetime: Duration::from_secs(self.turn.allocation_lifetime_secs),
            channel_lifetime: Duration::from_secs(self.turn.channel_lifetime_secs),
            dont_fragment: self.turn.dont_fragment,
            ..TurnConfig::new(server, &self.turn.username, &self.turn.password)
        })
    }

    /// Segment transport settings
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        let t = &self.transport;
        TransportConfig {
            max_segment_size: t.max_segment_size,
            window: t.window,
            max_sequence_lag: t.max_sequence_lag,
            congestion: CongestionConfig {
                min_rate: t.min_rate,
                max_rate: t.max_rate,
                ..CongestionConfig::default()
            },
            liveness: LivenessConfig {
                ping_interval: Duration::from_secs(t.ping_interval_secs),
                ping_timeout: Duration::from_secs(t.ping_timeout_secs),
                reconnect_timeout: Duration::from_secs(t.reconnect_timeout_secs),
                ..LivenessConfig::default()
            },
            ..TransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.turn.server, "127.0.0.1:3478");
        assert_eq!(config.turn.request_timeout_ms, 5000);
        assert_eq!(config.transport.window, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.transport.max_segment_size = 0;
        assert!(config.validate().is_err());

        config.transport.max_segment_size = 1300;
        config.turn.bind_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());

        config.turn.bind_addr = "0.0.0.0:0".to_string();
        config.transport.max_rate = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [turn]
            server = "turn.example.org:3478"
            username = "alice"
            password = "secret"

            [transport]
            window = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.turn.server, "turn.example.org:3478");
        assert_eq!(config.turn.max_retries, 3);
        assert_eq!(config.transport.window, 50);
        assert_eq!(config.transport.max_segment_size, 1300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_library_configs() {
        let mut config = Config::default();
        config.turn.username = "alice".to_string();
        config.turn.request_timeout_ms = 250;
        config.transport.ping_interval_secs = 9;

        let server: SocketAddr = "192.0.2.10:3478".parse().unwrap();
        let turn = config.turn_config(server).unwrap();
        assert_eq!(turn.server, server);
        assert_eq!(turn.username, "alice");
        assert_eq!(turn.request_timeout, Duration::from_millis(250));
        assert_eq!(turn.max_auth_retries, 2);

        let transport = config.transport_config();
        assert_eq!(transport.liveness.ping_interval, Duration::from_secs(9));
        assert_eq!(transport.congestion.loss_threshold, 0.04);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/turnpike.toml");

        let mut config = Config::default();
        config.turn.username = "bob".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.turn.username, "bob");
        assert_eq!(loaded.transport.window, config.transport.window);
    }
}
