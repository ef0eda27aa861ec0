//! `TurnSocket`: one allocation, its channel bindings, and the loop that
//! keeps both alive.
//!
//! The refresh loop ticks once per configured interval and, while the
//! network is available:
//!
//! 1. refreshes the allocation when it is close to expiring, rebuilding
//!    everything from a fresh local transport on allocation mismatch;
//! 2. re-binds enabled channel bindings that are close to expiring;
//! 3. removes channel bindings whose timer has run out.
//!
//! Failures inside a tick are logged and the loop carries on.

use super::allocation::{Allocation, ChannelRegistry, Reservation};
use super::error::TurnError;
use super::operations::{RelayedData, TurnOperations};
use crate::candidate::IceCandidate;
use crate::config::TurnConfig;
use crate::network::NetworkMonitor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turnpike_transport::TransportFactory;

/// Payload received from a peer: `(peer, bytes)`
pub type Received = (SocketAddr, Vec<u8>);

struct Inner {
    config: TurnConfig,
    factory: Arc<dyn TransportFactory>,
    network: Arc<dyn NetworkMonitor>,
    ops: RwLock<Arc<TurnOperations>>,
    allocation: Mutex<Option<Allocation>>,
    channels: Arc<Mutex<ChannelRegistry>>,
    received: mpsc::Sender<Received>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// TURN client socket.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use turnpike_relay::{NetworkSignal, TurnConfig, TurnSocket};
/// use turnpike_transport::UdpTransportFactory;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TurnConfig::new("198.51.100.1:3478".parse()?, "alice", "secret");
/// let factory = Arc::new(UdpTransportFactory::new(config.bind_addr));
/// let (socket, mut received) =
///     TurnSocket::open(config, factory, Arc::new(NetworkSignal::default())).await?;
///
/// let candidates = socket.allocate().await?;
/// let peer = "203.0.113.7:6000".parse()?;
/// socket.create_permission(peer).await?;
/// socket.send(b"hello", peer).await?;
///
/// if let Some((from, bytes)) = received.recv().await {
///     println!("{} bytes from {}", bytes.len(), from);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TurnSocket {
    inner: Arc<Inner>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl TurnSocket {
    /// Bind a transport from `factory` and start the refresh loop.
    ///
    /// Returns the socket and the queue peer data is delivered on.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::Transport` if the transport cannot be bound.
    pub async fn open(
        config: TurnConfig,
        factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Result<(Self, mpsc::Receiver<Received>), TurnError> {
        let transport = factory.create().await?;
        let (ops, relayed) = TurnOperations::start(transport, &config);
        let (received_tx, received_rx) = mpsc::channel(config.receive_queue.max(1));
        let channels = Arc::new(Mutex::new(ChannelRegistry::new(config.channel_lifetime)));

        let forwarder = tokio::spawn(forward(relayed, channels.clone(), received_tx.clone()));

        let inner = Arc::new(Inner {
            config,
            factory,
            network,
            ops: RwLock::new(Arc::new(ops)),
            allocation: Mutex::new(None),
            channels,
            received: received_tx,
            forwarder: Mutex::new(Some(forwarder)),
            closed: AtomicBool::new(false),
        });

        let refresh_task = tokio::spawn(refresh_loop(inner.clone()));

        Ok((
            Self {
                inner,
                refresh_task: Mutex::new(Some(refresh_task)),
            },
            received_rx,
        ))
    }

    /// Create the allocation if none exists. Returns its candidates.
    ///
    /// # Errors
    ///
    /// Returns the ALLOCATE failure, or `TurnError::Closed`.
    pub async fn allocate(&self) -> Result<Vec<IceCandidate>, TurnError> {
        self.inner.allocate().await
    }

    /// Relay and server-reflexive candidates of the current allocation,
    /// highest priority first. Empty without an allocation.
    #[must_use]
    pub fn get_ice(&self) -> Vec<IceCandidate> {
        self.inner
            .lock_allocation()
            .as_ref()
            .map(Allocation::candidates)
            .unwrap_or_default()
    }

    /// Bind a channel to `peer`, or re-enable its existing binding.
    ///
    /// Returns the channel number.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::NoAllocation` without an allocation,
    /// `TurnError::ChannelsExhausted`, or the CHANNEL-BIND failure. A failed
    /// number returns to the pool once no other bind for `peer` is in flight.
    pub async fn create_permission(&self, peer: SocketAddr) -> Result<u16, TurnError> {
        self.inner.create_permission(peer).await
    }

    /// Disable `peer`'s binding. It is no longer refreshed or usable for
    /// sends; its channel number is released when it expires.
    ///
    /// Returns whether a binding existed.
    pub fn remove_permission(&self, peer: SocketAddr) -> bool {
        let removed = self.inner.lock_channels().disable(peer);
        if removed {
            tracing::debug!("Channel binding to {} disabled", peer);
        }
        removed
    }

    /// Send `payload` to `peer` over its channel.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::NoBinding` if `peer` has no enabled binding,
    /// `TurnError::Closed` after `close`, or the transport failure.
    pub async fn send(&self, payload: &[u8], peer: SocketAddr) -> Result<(), TurnError> {
        self.inner.ensure_open()?;
        let channel = self
            .inner
            .lock_channels()
            .enabled_channel(peer)
            .ok_or(TurnError::NoBinding(peer))?;
        self.inner.ops().send(payload, channel).await
    }

    /// Whether an allocation exists
    #[must_use]
    pub fn has_allocation(&self) -> bool {
        self.inner.lock_allocation().is_some()
    }

    /// Refresh the allocation now.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::NoAllocation` without an allocation, or the
    /// REFRESH failure (the allocation is dropped on mismatch).
    pub async fn refresh(&self) -> Result<(), TurnError> {
        self.inner.refresh().await
    }

    /// Release the allocation on the server and drop every binding.
    ///
    /// # Errors
    ///
    /// Returns the REFRESH failure; local state is cleared regardless.
    pub async fn clear(&self) -> Result<(), TurnError> {
        self.inner.ensure_open()?;
        let had_allocation = self.inner.lock_allocation().take().is_some();
        self.inner.lock_channels().clear();
        if had_allocation {
            self.inner.ops().clear().await?;
        }
        Ok(())
    }

    /// Stop the refresh loop, cancel pending requests, close the transport
    /// and release every channel number. Does not contact the server; call
    /// `clear` first to release the allocation.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        self.inner.ops().close().await;
        let forwarder = self.inner.lock_forwarder().take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        self.inner.lock_allocation().take();
        self.inner.lock_channels().clear();
        tracing::debug!("TURN socket closed");
    }

    /// Local transport address
    ///
    /// # Errors
    ///
    /// Returns `TurnError::Transport` if it is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr, TurnError> {
        self.inner.ops().local_addr()
    }

    /// Channel number bound to `peer`
    #[must_use]
    pub fn channel_for(&self, peer: SocketAddr) -> Option<u16> {
        self.inner.lock_channels().get_channel(peer)
    }

    /// Peer bound to `channel`
    #[must_use]
    pub fn peer_for(&self, channel: u16) -> Option<SocketAddr> {
        self.inner.lock_channels().get_peer(channel)
    }
}

impl Drop for TurnSocket {
    fn drop(&mut self) {
        if let Some(task) = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        if let Some(forwarder) = self.inner.lock_forwarder().take() {
            forwarder.abort();
        }
    }
}

impl Inner {
    fn ops(&self) -> Arc<TurnOperations> {
        self.ops.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_allocation(&self) -> std::sync::MutexGuard<'_, Option<Allocation>> {
        self.allocation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, ChannelRegistry> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_forwarder(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.forwarder.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<(), TurnError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TurnError::Closed)
        } else {
            Ok(())
        }
    }

    async fn allocate(&self) -> Result<Vec<IceCandidate>, TurnError> {
        self.ensure_open()?;
        if let Some(allocation) = self.lock_allocation().as_ref() {
            return Ok(allocation.candidates());
        }

        let allocation = self
            .ops()
            .allocate(Some(self.config.allocation_lifetime))
            .await?;
        let candidates = allocation.candidates();
        *self.lock_allocation() = Some(allocation);
        Ok(candidates)
    }

    async fn create_permission(&self, peer: SocketAddr) -> Result<u16, TurnError> {
        self.ensure_open()?;
        if self.lock_allocation().is_none() {
            return Err(TurnError::NoAllocation);
        }

        let reservation = self.lock_channels().reserve(peer)?;
        let channel = match reservation {
            Reservation::Existing(channel) => return Ok(channel),
            // Another caller's bind is still in flight and may yet fail
            Reservation::Pending(channel) | Reservation::New(channel) => channel,
        };

        match self.ops().channel_bind(peer, channel).await {
            Ok(()) => {
                self.lock_channels().confirm(peer, channel);
                tracing::info!("Channel 0x{:04X} bound to {}", channel, peer);
                Ok(channel)
            }
            Err(e) => {
                self.lock_channels().discard(peer, channel);
                Err(e)
            }
        }
    }

    async fn refresh(&self) -> Result<(), TurnError> {
        self.ensure_open()?;
        if self.lock_allocation().is_none() {
            return Err(TurnError::NoAllocation);
        }

        match self
            .ops()
            .refresh(Some(self.config.allocation_lifetime))
            .await
        {
            Ok(granted) => {
                if let Some(allocation) = self.lock_allocation().as_mut() {
                    allocation.refreshed(std::time::Duration::from_secs(u64::from(granted)));
                }
                Ok(())
            }
            Err(e) => {
                if e.is_allocation_mismatch() {
                    self.lock_allocation().take();
                }
                Err(e)
            }
        }
    }

    /// Start over after an allocation mismatch: new local transport, new
    /// allocation, and a fresh bind for every binding that was enabled.
    async fn rebuild(&self) -> Result<(), TurnError> {
        tracing::warn!("Allocation mismatch, rebuilding on a fresh transport");

        let peers = {
            let mut channels = self.lock_channels();
            let peers = channels.enabled_peers();
            channels.clear();
            peers
        };
        self.lock_allocation().take();

        let transport = self.factory.create().await?;
        let (ops, relayed) = TurnOperations::start(transport, &self.config);
        let old = std::mem::replace(
            &mut *self.ops.write().unwrap_or_else(|e| e.into_inner()),
            Arc::new(ops),
        );
        old.close().await;

        let forwarder = tokio::spawn(forward(
            relayed,
            self.channels.clone(),
            self.received.clone(),
        ));
        if let Some(previous) = self.lock_forwarder().replace(forwarder) {
            previous.abort();
        }

        self.allocate().await?;
        for peer in peers {
            if let Err(e) = self.create_permission(peer).await {
                tracing::warn!("Re-binding {} after rebuild failed: {}", peer, e);
            }
        }
        Ok(())
    }

    async fn tick(&self) {
        if !self.network.is_available() {
            tracing::trace!("Network unavailable, skipping refresh tick");
            return;
        }

        let (due, expired) = match self.lock_allocation().as_ref() {
            Some(a) => (a.timer().is_close_to_expiring(), a.timer().is_expired()),
            None => (false, false),
        };
        if expired {
            tracing::warn!("Allocation expired before it could be refreshed");
            self.lock_allocation().take();
            self.lock_channels().clear();
        } else if due {
            match self.refresh().await {
                Ok(()) => {}
                Err(e) if e.is_allocation_mismatch() => {
                    if let Err(e) = self.rebuild().await {
                        tracing::warn!("Allocation rebuild failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Allocation refresh failed: {}", e),
            }
        }

        let due = self.lock_channels().due_for_refresh();
        for (peer, channel) in due {
            match self.ops().channel_bind(peer, channel).await {
                Ok(()) => self.lock_channels().confirm(peer, channel),
                Err(e) => tracing::warn!("Refreshing channel 0x{:04X} to {} failed: {}", channel, peer, e),
            }
        }

        for (peer, channel) in self.lock_channels().purge_expired() {
            tracing::info!("Channel 0x{:04X} to {} expired", channel, peer);
        }
    }
}

async fn refresh_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.refresh_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        inner.tick().await;
    }
}

/// Map relayed data to its peer and deliver it in receipt order.
async fn forward(
    mut relayed: mpsc::Receiver<RelayedData>,
    channels: Arc<Mutex<ChannelRegistry>>,
    received: mpsc::Sender<Received>,
) {
    while let Some(data) = relayed.recv().await {
        let delivery = match data {
            RelayedData::Channel { channel, payload } => {
                let peer = channels
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get_peer(channel);
                match peer {
                    Some(peer) => (peer, payload),
                    None => {
                        tracing::debug!("Dropping data on unbound channel 0x{:04X}", channel);
                        continue;
                    }
                }
            }
            RelayedData::Indication { peer, payload } => (peer, payload),
        };

        if received.send(delivery).await.is_err() {
            break;
        }
    }
}
