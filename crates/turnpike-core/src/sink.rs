//! Outbound frame sinks.
//!
//! Segment streams write encoded frames to a `FrameSink`. In production the
//! sink is a TURN channel to one peer; tests and in-process setups use an
//! mpsc channel.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use turnpike_relay::TurnSocket;

use crate::error::{Error, Result};

/// Destination for encoded frames
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Write one encoded frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::SinkClosed` when the other end is gone, or the relay
    /// error for TURN-backed sinks.
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<Vec<u8>> {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.send(frame).await.map_err(|_| Error::SinkClosed)
    }
}

/// Frames to one peer over a channel binding of a `TurnSocket`
#[derive(Clone)]
pub struct TurnPeerSink {
    socket: Arc<TurnSocket>,
    peer: SocketAddr,
}

impl TurnPeerSink {
    /// Sink for `peer`; the socket must hold a binding for it before frames
    /// are written
    #[must_use]
    pub fn new(socket: Arc<TurnSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    /// Peer address frames are relayed to
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl std::fmt::Debug for TurnPeerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnPeerSink").field("peer", &self.peer).finish()
    }
}

#[async_trait]
impl FrameSink for TurnPeerSink {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.socket.send(&frame, self.peer).await?;
        Ok(())
    }
}
