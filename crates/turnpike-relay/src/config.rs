//! TURN client configuration

use std::net::SocketAddr;
use std::time::Duration;

/// TURN client configuration
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// TURN server address
    pub server: SocketAddr,

    /// Long-term credential username
    pub username: String,

    /// Long-term credential password
    pub password: String,

    /// Local bind address; port 0 lets a recreated transport get a new port
    pub bind_addr: SocketAddr,

    /// Wait for a response before retransmitting
    pub request_timeout: Duration,

    /// Retransmissions after the first send before giving up
    pub max_retries: u32,

    /// Requests re-sent after 401/438 challenges, per operation
    pub max_auth_retries: u32,

    /// Requested allocation lifetime
    pub allocation_lifetime: Duration,

    /// Channel binding lifetime (RFC 5766 fixes this at 10 minutes)
    pub channel_lifetime: Duration,

    /// Period of the refresh loop
    pub refresh_interval: Duration,

    /// Ask the server to set DF on relayed packets
    pub dont_fragment: bool,

    /// Largest datagram the transport will send
    pub max_datagram_size: usize,

    /// Capacity of the inbound channel-data queue
    pub receive_queue: usize,
}

impl TurnConfig {
    /// Configuration for `server` with the given credentials and defaults
    /// for everything else.
    #[must_use]
    pub fn new(server: SocketAddr, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server,
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], 3478)),
            username: String::new(),
            password: String::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            request_timeout: Duration::from_secs(5),
            max_retries: 3,
            max_auth_retries: 2,
            allocation_lifetime: Duration::from_secs(600),
            channel_lifetime: Duration::from_secs(600),
            refresh_interval: Duration::from_secs(1),
            dont_fragment: false,
            max_datagram_size: turnpike_transport::DEFAULT_MAX_DATAGRAM_SIZE,
            receive_queue: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_auth_retries, 2);
        assert_eq!(config.allocation_lifetime, Duration::from_secs(600));
        assert_eq!(config.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.bind_addr.port(), 0);
    }

    #[test]
    fn test_new_keeps_defaults() {
        let server: SocketAddr = "198.51.100.1:3478".parse().unwrap();
        let config = TurnConfig::new(server, "alice", "secret");
        assert_eq!(config.server, server);
        assert_eq!(config.username, "alice");
        assert_eq!(config.max_retries, 3);
    }
}
