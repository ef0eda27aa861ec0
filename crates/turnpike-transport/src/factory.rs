//! Transport factory for creating transport instances.
//!
//! `TurnSocket` owns a factory rather than a socket: after the server reports
//! an allocation mismatch the client must start over from a fresh local
//! transport address, which means binding a new socket.

use crate::DEFAULT_MAX_DATAGRAM_SIZE;
use crate::transport::{Transport, TransportResult};
use crate::udp_async::AsyncUdpTransport;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

/// Default bind address (any interface, OS-assigned port)
const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

/// Creates bound transports on demand.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Bind a new transport.
    ///
    /// # Errors
    /// Returns `TransportError` if the transport cannot be bound
    async fn create(&self) -> TransportResult<Arc<dyn Transport>>;
}

/// Factory producing `AsyncUdpTransport` instances.
///
/// # Examples
///
/// ```no_run
/// use turnpike_transport::factory::{TransportFactory, UdpTransportFactory};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = UdpTransportFactory::new("127.0.0.1:0".parse()?);
/// let transport = factory.create().await?;
/// println!("bound to {}", transport.local_addr()?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct UdpTransportFactory {
    bind_addr: SocketAddr,
    max_datagram_size: usize,
}

impl UdpTransportFactory {
    /// Create a factory binding every transport to `bind_addr`.
    ///
    /// Use port 0 so a recreated transport gets a new local port.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }

    /// Set the datagram size limit applied to created transports.
    #[must_use]
    pub fn with_max_datagram_size(mut self, max: usize) -> Self {
        self.max_datagram_size = max;
        self
    }

    /// Address new transports are bound to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

impl Default for UdpTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_ADDR)
    }
}

#[async_trait]
impl TransportFactory for UdpTransportFactory {
    async fn create(&self) -> TransportResult<Arc<dyn Transport>> {
        let transport = AsyncUdpTransport::bind(self.bind_addr)
            .await?
            .with_max_datagram_size(self.max_datagram_size);
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_factory_binds_any() {
        let factory = UdpTransportFactory::default();
        assert_eq!(factory.bind_addr(), DEFAULT_BIND_ADDR);
    }

    #[tokio::test]
    async fn test_factory_creates_distinct_ports() {
        let factory = UdpTransportFactory::new("127.0.0.1:0".parse().unwrap());

        let first = factory.create().await.unwrap();
        let second = factory.create().await.unwrap();

        assert_ne!(
            first.local_addr().unwrap().port(),
            second.local_addr().unwrap().port()
        );
    }

    #[tokio::test]
    async fn test_factory_applies_datagram_limit() {
        let factory =
            UdpTransportFactory::new("127.0.0.1:0".parse().unwrap()).with_max_datagram_size(8);
        let transport = factory.create().await.unwrap();

        let result = transport
            .send_to(&[0u8; 9], "127.0.0.1:9".parse().unwrap())
            .await;
        assert!(result.is_err());
    }
}
