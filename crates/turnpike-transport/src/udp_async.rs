//! Async UDP transport implementation.
//!
//! Tokio-backed implementation of the `Transport` trait with statistics
//! tracking, a bounded datagram size and close support.

use crate::DEFAULT_MAX_DATAGRAM_SIZE;
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::UdpSocket;

/// Socket buffer size requested from the kernel (1 MB)
const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// Async UDP transport using Tokio.
///
/// # Examples
///
/// ```no_run
/// use turnpike_transport::udp_async::AsyncUdpTransport;
/// use turnpike_transport::transport::Transport;
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = AsyncUdpTransport::bind("127.0.0.1:0".parse::<SocketAddr>()?).await?;
/// println!("Listening on {}", transport.local_addr()?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    max_datagram_size: usize,
    counters: Arc<Counters>,
}

impl AsyncUdpTransport {
    /// Create a new async UDP transport bound to the given address.
    ///
    /// Use "0.0.0.0:0" for automatic port selection.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        let addr = addr.into();

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket2 =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket2
            .set_send_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .bind(&addr.into())
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        tracing::debug!("UDP transport bound to {:?}", socket.local_addr().ok());

        Ok(Self::from_socket(socket))
    }

    /// Create from an existing Tokio `UdpSocket`.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Override the largest datagram `send_to` accepts.
    #[must_use]
    pub fn with_max_datagram_size(mut self, max: usize) -> Self {
        self.max_datagram_size = max;
        self
    }

    /// Largest datagram `send_to` accepts.
    #[must_use]
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        if buf.len() > self.max_datagram_size {
            self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::DatagramTooLarge {
                size: buf.len(),
                max: self.max_datagram_size,
            });
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.counters
                    .bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.recv_from(buf).await {
            Ok((size, addr)) => {
                self.counters
                    .bytes_received
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.counters
                    .packets_received
                    .fetch_add(1, Ordering::Relaxed);
                Ok((size, addr))
            }
            Err(e) => {
                self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
            recv_errors: self.counters.recv_errors.load(Ordering::Relaxed),
        }
    }
}
