//! Request/response engine for one TURN server over one transport.
//!
//! Every inbound datagram from the server is demultiplexed on its first two
//! bytes: ChannelData goes to the relayed-data queue, anything else is
//! decoded as STUN and either completes a pending transaction or (for Data
//! indications) joins the relayed-data queue. Malformed datagrams are logged
//! and dropped; they never fail an unrelated request.

use super::allocation::Allocation;
use super::credentials::Credentials;
use super::error::TurnError;
use super::transaction::PendingTransactions;
use crate::config::TurnConfig;
use crate::stun::{
    ChannelData, StunAttribute, StunClass, StunMessage, StunMethod, TRANSPORT_UDP,
    is_channel_data, is_valid_channel,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turnpike_transport::{Datagram, Dispatcher, Transport};

/// Data relayed from a peer through the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayedData {
    /// ChannelData on a bound channel
    Channel {
        /// Channel number
        channel: u16,
        /// Payload
        payload: Vec<u8>,
    },
    /// Data indication naming the peer directly
    Indication {
        /// Peer address
        peer: SocketAddr,
        /// Payload
        payload: Vec<u8>,
    },
}

/// Request engine for one server.
pub struct TurnOperations {
    server: SocketAddr,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    pending: Arc<PendingTransactions>,
    credentials: Mutex<Credentials>,
    request_timeout: Duration,
    max_retries: u32,
    max_auth_retries: u32,
    dont_fragment: bool,
    demux: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TurnOperations {
    /// Start the engine on `transport`.
    ///
    /// Returns the engine and the queue relayed data arrives on. Must be
    /// called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        transport: Arc<dyn Transport>,
        config: &TurnConfig,
    ) -> (Self, mpsc::Receiver<RelayedData>) {
        let dispatcher = Dispatcher::start(transport.clone());
        let (_, datagrams) = dispatcher.subscribe(config.receive_queue);
        let (relayed_tx, relayed_rx) = mpsc::channel(config.receive_queue.max(1));
        let pending = Arc::new(PendingTransactions::new());

        let demux = tokio::spawn(demux_loop(
            config.server,
            datagrams,
            pending.clone(),
            relayed_tx,
        ));

        let ops = Self {
            server: config.server,
            transport,
            dispatcher,
            pending,
            credentials: Mutex::new(Credentials::new(&config.username, &config.password)),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            max_auth_retries: config.max_auth_retries,
            dont_fragment: config.dont_fragment,
            demux: Mutex::new(Some(demux)),
            closed: AtomicBool::new(false),
        };

        (ops, relayed_rx)
    }

    /// Server this engine talks to
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Local transport address
    ///
    /// # Errors
    ///
    /// Returns `TurnError::Transport` if the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr, TurnError> {
        Ok(self.transport.local_addr()?)
    }

    /// Credentials as updated by the last challenge
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        self.lock_credentials().clone()
    }

    /// Number of requests awaiting a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Request a UDP relay allocation.
    ///
    /// # Errors
    ///
    /// Returns the server's failure, `TurnError::MissingAttribute` if the
    /// success response lacks an address, or `TurnError::ServerUnreachable`.
    pub async fn allocate(&self, lifetime: Option<Duration>) -> Result<Allocation, TurnError> {
        let dont_fragment = self.dont_fragment;
        let response = self
            .request(|| {
                let mut msg = StunMessage::request(StunMethod::Allocate)
                    .with_attribute(StunAttribute::RequestedTransport(TRANSPORT_UDP));
                if dont_fragment {
                    msg.add_attribute(StunAttribute::DontFragment);
                }
                if let Some(lifetime) = lifetime {
                    msg.add_attribute(StunAttribute::Lifetime(lifetime_secs(lifetime)));
                }
                msg
            })
            .await?;

        let relayed = response
            .xor_relayed_address()
            .ok_or(TurnError::MissingAttribute("XOR-RELAYED-ADDRESS"))?;
        let mapped = response
            .xor_mapped_address()
            .ok_or(TurnError::MissingAttribute("XOR-MAPPED-ADDRESS"))?;
        let granted = response
            .lifetime()
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .or(lifetime)
            .ok_or(TurnError::MissingAttribute("LIFETIME"))?;

        tracing::info!(
            "Allocated relay {} (mapped {}) for {}s",
            relayed,
            mapped,
            granted.as_secs()
        );

        Ok(Allocation::new(relayed, mapped, granted, TRANSPORT_UDP))
    }

    /// Refresh the allocation. Returns the granted lifetime in seconds.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::AllocationMismatch` if the server has no
    /// allocation for this transport, or any other request failure.
    pub async fn refresh(&self, lifetime: Option<Duration>) -> Result<u32, TurnError> {
        let response = self
            .request(|| {
                let mut msg = StunMessage::request(StunMethod::Refresh);
                if let Some(lifetime) = lifetime {
                    msg.add_attribute(StunAttribute::Lifetime(lifetime_secs(lifetime)));
                }
                msg
            })
            .await?;

        let granted = response
            .lifetime()
            .or_else(|| lifetime.map(lifetime_secs))
            .unwrap_or(0);
        tracing::debug!("Allocation refreshed for {}s", granted);
        Ok(granted)
    }

    /// Install a permission for `peer` (CREATE-PERMISSION).
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn create_permission(&self, peer: SocketAddr) -> Result<(), TurnError> {
        self.request(|| {
            StunMessage::request(StunMethod::CreatePermission)
                .with_attribute(StunAttribute::XorPeerAddress(peer))
        })
        .await?;
        tracing::debug!("Permission installed for {}", peer);
        Ok(())
    }

    /// Bind `channel` to `peer` (CHANNEL-BIND). Also used to refresh an
    /// existing binding.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::Stun` for a channel outside 0x4000-0x7FFF, or the
    /// request failure.
    pub async fn channel_bind(&self, peer: SocketAddr, channel: u16) -> Result<(), TurnError> {
        if !is_valid_channel(channel) {
            return Err(crate::stun::StunError::InvalidChannel(channel).into());
        }

        self.request(|| {
            StunMessage::request(StunMethod::ChannelBind)
                .with_attribute(StunAttribute::ChannelNumber(channel))
                .with_attribute(StunAttribute::XorPeerAddress(peer))
        })
        .await?;
        tracing::debug!("Channel 0x{:04X} bound to {}", channel, peer);
        Ok(())
    }

    /// Delete the allocation (REFRESH with lifetime 0).
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn clear(&self) -> Result<(), TurnError> {
        self.refresh(Some(Duration::ZERO)).await?;
        tracing::info!("Allocation released");
        Ok(())
    }

    /// Send `payload` to the peer bound to `channel`.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::Closed` after `close`, or the transport failure.
    pub async fn send(&self, payload: &[u8], channel: u16) -> Result<(), TurnError> {
        if self.is_closed() {
            return Err(TurnError::Closed);
        }
        let frame = crate::stun::channel_data::encode_channel_data(channel, payload);
        self.transport.send_to(&frame, self.server).await?;
        Ok(())
    }

    /// Stop the engine. Pending requests resolve to `TurnError::Closed` and
    /// the transport's receive loop terminates.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.cancel_all();
        self.dispatcher.close().await;
        let demux = self.demux.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(demux) = demux {
            demux.abort();
        }
        tracing::debug!("TURN operations for {} closed", self.server);
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request built by `build`, answering up to `max_auth_retries`
    /// 401/438 challenges. Each attempt gets a fresh transaction id.
    async fn request<F>(&self, build: F) -> Result<StunMessage, TurnError>
    where
        F: Fn() -> StunMessage,
    {
        let mut auth_retries = 0;

        loop {
            let mut request = build();
            self.sign(&mut request);

            let response = self.send_with_retries(&request).await?;
            if response.method != request.method {
                return Err(TurnError::UnexpectedResponse(format!(
                    "{:?} response to {:?} request",
                    response.method, request.method
                )));
            }

            match response.class {
                StunClass::SuccessResponse => return Ok(response),
                StunClass::ErrorResponse => {
                    let err = error_from_response(&response)?;
                    if !err.is_auth_challenge() || auth_retries >= self.max_auth_retries {
                        tracing::debug!("{:?} request failed: {}", request.method, err);
                        return Err(err);
                    }

                    auth_retries += 1;
                    let mut credentials = self.lock_credentials();
                    match err {
                        TurnError::Unauthorized { realm, nonce } => {
                            tracing::debug!("Authenticating to realm {:?}", realm);
                            credentials.set_challenge(realm, nonce);
                        }
                        TurnError::StaleNonce { nonce } => {
                            tracing::debug!("Nonce expired, retrying");
                            credentials.set_nonce(nonce);
                        }
                        _ => {}
                    }
                }
                class => {
                    return Err(TurnError::UnexpectedResponse(format!("{class:?}")));
                }
            }
        }
    }

    /// Transmit `request` until answered, retransmitting the same bytes
    /// (same transaction id) after each timeout.
    async fn send_with_retries(&self, request: &StunMessage) -> Result<StunMessage, TurnError> {
        if self.is_closed() {
            return Err(TurnError::Closed);
        }

        let id = request.transaction_id;
        let bytes = request.encode();
        let mut response = self.pending.register(id);
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            tracing::trace!(
                "Sending {:?} {} (attempt {}/{})",
                request.method,
                id,
                attempt,
                attempts
            );
            if let Err(e) = self.transport.send_to(&bytes, self.server).await {
                self.pending.remove(&id);
                return Err(e.into());
            }

            match tokio::time::timeout(self.request_timeout, &mut response).await {
                Ok(Ok(message)) => return Ok(message),
                Ok(Err(_)) => return Err(TurnError::Closed),
                Err(_) => {
                    tracing::debug!("{:?} {} timed out", request.method, id);
                }
            }
        }

        self.pending.remove(&id);
        Err(TurnError::ServerUnreachable { attempts })
    }

    fn sign(&self, request: &mut StunMessage) {
        let credentials = self.lock_credentials();
        if !credentials.is_authenticated() {
            return;
        }

        request.add_attribute(StunAttribute::Username(credentials.username().to_string()));
        request.add_attribute(StunAttribute::Realm(
            credentials.realm().unwrap_or_default().to_string(),
        ));
        request.add_attribute(StunAttribute::Nonce(
            credentials.nonce().unwrap_or_default().to_string(),
        ));
        request.add_message_integrity(&credentials.key());
    }

    fn lock_credentials(&self) -> std::sync::MutexGuard<'_, Credentials> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TurnOperations {
    fn drop(&mut self) {
        self.pending.cancel_all();
        if let Some(demux) = self.demux.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            demux.abort();
        }
    }
}

fn error_from_response(response: &StunMessage) -> Result<TurnError, TurnError> {
    let (code, reason) = response
        .error_code()
        .ok_or(TurnError::MissingAttribute("ERROR-CODE"))?;
    Ok(TurnError::from_error_code(
        code,
        reason,
        response.realm(),
        response.nonce(),
    ))
}

async fn demux_loop(
    server: SocketAddr,
    mut datagrams: mpsc::Receiver<Datagram>,
    pending: Arc<PendingTransactions>,
    relayed: mpsc::Sender<RelayedData>,
) {
    while let Some(Datagram { from, data }) = datagrams.recv().await {
        if from != server {
            tracing::debug!("Ignoring {} bytes from non-server {}", data.len(), from);
            continue;
        }

        let inbound = if is_channel_data(&data) {
            match ChannelData::decode(&data) {
                Ok(frame) => RelayedData::Channel {
                    channel: frame.channel,
                    payload: frame.payload,
                },
                Err(e) => {
                    tracing::warn!("Dropping malformed channel data: {}", e);
                    continue;
                }
            }
        } else {
            match StunMessage::decode(&data) {
                Ok(message) if message.class.is_response() => {
                    pending.complete(message);
                    continue;
                }
                Ok(message) if message.method == StunMethod::Data => {
                    match (message.xor_peer_address(), message.data()) {
                        (Some(peer), Some(payload)) => RelayedData::Indication {
                            peer,
                            payload: payload.to_vec(),
                        },
                        _ => {
                            tracing::warn!("Dropping Data indication without peer or data");
                            continue;
                        }
                    }
                }
                Ok(message) => {
                    tracing::debug!(
                        "Ignoring {:?} {:?} from server",
                        message.method,
                        message.class
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Dropping malformed STUN message: {}", e);
                    continue;
                }
            }
        };

        match relayed.try_send(inbound) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Relayed data queue full, dropping datagram");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }

    tracing::debug!("TURN demux loop stopped");
}

/// LIFETIME attribute value for `lifetime`, saturating at the field width
fn lifetime_secs(lifetime: Duration) -> u32 {
    u32::try_from(lifetime.as_secs()).unwrap_or(u32::MAX)
}
