//! Per-peer connection: one reliable and one unreliable stream over a
//! shared frame sink.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::error::{Result, SendError};
use crate::frame::Frame;
use crate::liveness::LivenessHandle;
use crate::receive::ReceiveLogic;
use crate::send::{SendLogic, SendStats};
use crate::sink::FrameSink;

/// A reassembled application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sending peer
    pub peer: SocketAddr,
    /// Stream the message arrived on
    pub reliable: bool,
    /// Message bytes
    pub payload: Vec<u8>,
}

/// What an inbound frame turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    /// Segment; `delivered` messages were completed by it
    Data {
        /// Stream
        reliable: bool,
        /// Whether an ack was sent; refused segments are left to retransmission
        acked: bool,
        /// Messages completed
        delivered: usize,
    },
    /// Acknowledgment for one of our segments
    Ack {
        /// Stream
        reliable: bool,
        /// Whether the sequence was still outstanding
        known: bool,
    },
    /// Peer probe, answered with a pong
    Ping,
    /// Answer to a probe
    Pong {
        /// Whether the nonce matched our outstanding ping
        matched: bool,
    },
}

/// Send and receive statistics for both streams
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    /// Reliable stream
    pub reliable: SendStats,
    /// Unreliable stream
    pub unreliable: SendStats,
}

/// Segment transport to one peer
pub struct PeerConnection {
    peer: SocketAddr,
    sink: Arc<dyn FrameSink>,
    reliable_tx: SendLogic,
    unreliable_tx: SendLogic,
    reliable_rx: Mutex<ReceiveLogic>,
    unreliable_rx: Mutex<ReceiveLogic>,
    deliveries: mpsc::Sender<Delivery>,
    ping_nonce: Mutex<Option<u64>>,
    liveness: Option<LivenessHandle>,
}

impl PeerConnection {
    /// Open both streams to `peer`. Completed messages arrive on the
    /// returned receiver. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn open(
        peer: SocketAddr,
        sink: Arc<dyn FrameSink>,
        config: &TransportConfig,
    ) -> (Self, mpsc::Receiver<Delivery>) {
        let (deliveries, rx) = mpsc::channel(config.delivery_queue.max(1));
        let connection = Self {
            peer,
            reliable_tx: SendLogic::start(Arc::clone(&sink), true, config),
            unreliable_tx: SendLogic::start(Arc::clone(&sink), false, config),
            sink,
            reliable_rx: Mutex::new(
                ReceiveLogic::new(true).with_max_lag(config.max_sequence_lag),
            ),
            unreliable_rx: Mutex::new(ReceiveLogic::new(false)),
            deliveries,
            ping_nonce: Mutex::new(None),
            liveness: None,
        };
        (connection, rx)
    }

    /// Report traffic and pongs to a liveness registry
    #[must_use]
    pub fn with_liveness(mut self, liveness: LivenessHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Remote peer
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a message on the reliable stream.
    ///
    /// # Errors
    ///
    /// Backpressure or `Closed`; see [`SendLogic::send`].
    pub fn send_reliable(&self, payload: &[u8]) -> std::result::Result<(), SendError> {
        self.reliable_tx.send(payload)
    }

    /// Queue a message on the unreliable stream.
    ///
    /// # Errors
    ///
    /// Backpressure or `Closed`; see [`SendLogic::send`].
    pub fn send_unreliable(&self, payload: &[u8]) -> std::result::Result<(), SendError> {
        self.unreliable_tx.send(payload)
    }

    /// Process one frame received from the peer.
    ///
    /// # Errors
    ///
    /// `Error::Frame` for undecodable input, or the sink error when an ack or
    /// pong cannot be written. Messages completed by a segment are delivered
    /// even when its ack fails.
    pub async fn handle_frame(&self, bytes: &[u8]) -> Result<Incoming> {
        let frame = Frame::decode(bytes)?;

        let incoming = match frame {
            Frame::Data {
                reliable,
                body_type,
                sequence,
                payload,
            } => {
                let receipt = self.receiver(reliable).receive(sequence, body_type, payload);

                // Deliver before acking so a failed ack write loses nothing.
                let delivered = receipt.delivered.len();
                for payload in receipt.delivered {
                    self.deliver(reliable, payload).await;
                }

                let acked = receipt.ack.is_some();
                if let Some(sequence) = receipt.ack {
                    self.sink
                        .send_frame(Frame::Ack { reliable, sequence }.encode())
                        .await?;
                } else {
                    tracing::debug!(peer = %self.peer, reliable, sequence, "segment refused");
                }
                self.on_traffic();
                Incoming::Data {
                    reliable,
                    acked,
                    delivered,
                }
            }
            Frame::Ack { reliable, sequence } => {
                let known = self.sender(reliable).ack_data(sequence);
                self.on_traffic();
                Incoming::Ack { reliable, known }
            }
            Frame::Ping { nonce } => {
                self.sink.send_frame(Frame::Pong { nonce }.encode()).await?;
                self.on_traffic();
                Incoming::Ping
            }
            Frame::Pong { nonce } => {
                let matched = {
                    let mut pending = self.ping_nonce();
                    if *pending == Some(nonce) {
                        *pending = None;
                        true
                    } else {
                        false
                    }
                };
                if matched {
                    if let Some(liveness) = &self.liveness {
                        liveness.on_pong(self.peer);
                    }
                } else {
                    tracing::debug!(peer = %self.peer, nonce, "unexpected pong");
                }
                Incoming::Pong { matched }
            }
        };
        Ok(incoming)
    }

    /// Send a ping with a fresh nonce, replacing any outstanding one.
    ///
    /// # Errors
    ///
    /// Returns the sink error if the frame cannot be written.
    pub async fn ping(&self) -> Result<u64> {
        let nonce = rand::random::<u64>();
        *self.ping_nonce() = Some(nonce);
        self.sink.send_frame(Frame::Ping { nonce }.encode()).await?;
        tracing::trace!(peer = %self.peer, nonce, "ping sent");
        Ok(nonce)
    }

    /// Send-side statistics of both streams
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            reliable: self.reliable_tx.stats(),
            unreliable: self.unreliable_tx.stats(),
        }
    }

    /// Stop both streams
    pub fn close(&self) {
        self.reliable_tx.close();
        self.unreliable_tx.close();
        if let Some(liveness) = &self.liveness {
            liveness.remove(self.peer);
        }
        tracing::debug!(peer = %self.peer, "connection closed");
    }

    fn sender(&self, reliable: bool) -> &SendLogic {
        if reliable {
            &self.reliable_tx
        } else {
            &self.unreliable_tx
        }
    }

    fn receiver(&self, reliable: bool) -> MutexGuard<'_, ReceiveLogic> {
        let rx = if reliable {
            &self.reliable_rx
        } else {
            &self.unreliable_rx
        };
        rx.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ping_nonce(&self) -> MutexGuard<'_, Option<u64>> {
        self.ping_nonce.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand a message to the application. The reliable stream waits for
    /// queue space since its segments are already acked; the unreliable
    /// stream drops on a full queue.
    async fn deliver(&self, reliable: bool, payload: Vec<u8>) {
        let delivery = Delivery {
            peer: self.peer,
            reliable,
            payload,
        };
        if reliable {
            if self.deliveries.send(delivery).await.is_err() {
                tracing::warn!(peer = %self.peer, "delivery receiver dropped");
            }
        } else if self.deliveries.try_send(delivery).is_err() {
            tracing::warn!(peer = %self.peer, "delivery queue full, dropping unreliable message");
        }
    }

    fn on_traffic(&self) {
        if let Some(liveness) = &self.liveness {
            liveness.on_traffic(self.peer);
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer", &self.peer)
            .field("reliable", &self.reliable_tx)
            .field("unreliable", &self.unreliable_tx)
            .finish_non_exhaustive()
    }
}
