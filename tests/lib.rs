//! Shared fixtures for Turnpike integration tests.
//!
//! `RelayServer` is a small loopback TURN server: it challenges
//! unauthenticated requests, checks MESSAGE-INTEGRITY with long-term
//! credentials, and relays data between clients through per-allocation UDP
//! sockets. Permissions are not enforced.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use turnpike_relay::stun::{
    ChannelData, StunAttribute, StunClass, StunMessage, StunMethod, is_channel_data,
};
use turnpike_relay::turn::Credentials;

/// Realm announced in challenges
pub const REALM: &str = "turnpike.test";

/// Nonce announced in challenges
pub const NONCE: &str = "f00dfacecafe";

struct Relay {
    socket: Arc<UdpSocket>,
    channels: Arc<Mutex<HashMap<u16, SocketAddr>>>,
    task: JoinHandle<()>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct State {
    allocations: HashMap<SocketAddr, Relay>,
    challenges: usize,
    requests: Vec<(StunMethod, StunClass)>,
}

struct Shared {
    socket: Arc<UdpSocket>,
    username: String,
    password: String,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(&self) -> Vec<u8> {
        let mut credentials = Credentials::new(&self.username, &self.password);
        credentials.set_challenge(REALM, NONCE);
        credentials.key().to_vec()
    }
}

/// Loopback TURN server
pub struct RelayServer {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl RelayServer {
    /// Bind on 127.0.0.1 and accept `username`/`password`
    pub async fn start(username: &str, password: &str) -> Self {
        let socket = Arc::new(
            UdpSocket::bind("127.0.0.1:0")
                .await
                .expect("bind relay server"),
        );
        let shared = Arc::new(Shared {
            socket,
            username: username.to_string(),
            password: password.to_string(),
            state: Mutex::new(State::default()),
        });
        let task = tokio::spawn(serve(Arc::clone(&shared)));
        Self { shared, task }
    }

    /// Server address
    pub fn addr(&self) -> SocketAddr {
        self.shared.socket.local_addr().expect("server address")
    }

    /// Live allocations
    pub fn allocation_count(&self) -> usize {
        self.shared.state().allocations.len()
    }

    /// 401 responses sent
    pub fn challenges(&self) -> usize {
        self.shared.state().challenges
    }

    /// Method and class of every STUN message received
    pub fn requests(&self) -> Vec<(StunMethod, StunClass)> {
        self.shared.state().requests.clone()
    }

    /// Channels bound by the client at `client`
    pub fn channels_of(&self, client: SocketAddr) -> HashMap<u16, SocketAddr> {
        self.shared
            .state()
            .allocations
            .get(&client)
            .map(|relay| relay.channels.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(shared: Arc<Shared>) {
    let mut buf = vec![0u8; 65536];
    loop {
        let Ok((len, from)) = shared.socket.recv_from(&mut buf).await else {
            continue;
        };
        let datagram = &buf[..len];

        if is_channel_data(datagram) {
            if let Ok(frame) = ChannelData::decode(datagram) {
                relay_channel_data(&shared, from, frame).await;
            }
            continue;
        }

        let Ok(message) = StunMessage::decode(datagram) else {
            tracing::debug!(%from, "relay server dropped malformed datagram");
            continue;
        };
        shared.state().requests.push((message.method, message.class));

        if message.class == StunClass::Indication {
            if message.method == StunMethod::Send {
                relay_send_indication(&shared, from, &message).await;
            }
            continue;
        }

        let response = handle_request(&shared, from, &message).await;
        let _ = shared.socket.send_to(&response.encode(), from).await;
    }
}

async fn relay_channel_data(shared: &Shared, from: SocketAddr, frame: ChannelData) {
    let target = {
        let state = shared.state();
        state.allocations.get(&from).and_then(|relay| {
            let channels = relay.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .get(&frame.channel)
                .map(|peer| (Arc::clone(&relay.socket), *peer))
        })
    };
    if let Some((socket, peer)) = target {
        let _ = socket.send_to(&frame.payload, peer).await;
    }
}

async fn relay_send_indication(shared: &Shared, from: SocketAddr, message: &StunMessage) {
    let (Some(peer), Some(data)) = (message.xor_peer_address(), message.data()) else {
        return;
    };
    let socket = shared
        .state()
        .allocations
        .get(&from)
        .map(|relay| Arc::clone(&relay.socket));
    if let Some(socket) = socket {
        let _ = socket.send_to(data, peer).await;
    }
}

fn error(request: &StunMessage, code: u16, reason: &str) -> StunMessage {
    StunMessage::response_to(request, StunClass::ErrorResponse).with_attribute(
        StunAttribute::ErrorCode {
            code,
            reason: reason.to_string(),
        },
    )
}

async fn handle_request(shared: &Arc<Shared>, from: SocketAddr, request: &StunMessage) -> StunMessage {
    let key = shared.key();
    let authenticated = request.nonce() == Some(NONCE)
        && request.attributes.iter().any(
            |attr| matches!(attr, StunAttribute::Username(name) if *name == shared.username),
        )
        && request.verify_message_integrity(&key).is_ok();

    if !authenticated {
        shared.state().challenges += 1;
        return error(request, 401, "Unauthorized")
            .with_attribute(StunAttribute::Realm(REALM.to_string()))
            .with_attribute(StunAttribute::Nonce(NONCE.to_string()));
    }

    let mut response = match request.method {
        StunMethod::Allocate => allocate(shared, from, request).await,
        StunMethod::Refresh => refresh(shared, from, request),
        StunMethod::CreatePermission => {
            if shared.state().allocations.contains_key(&from) {
                StunMessage::response_to(request, StunClass::SuccessResponse)
            } else {
                error(request, 437, "Allocation Mismatch")
            }
        }
        StunMethod::ChannelBind => channel_bind(shared, from, request),
        _ => error(request, 400, "Bad Request"),
    };
    response.add_message_integrity(&key);
    response
}

async fn allocate(shared: &Arc<Shared>, from: SocketAddr, request: &StunMessage) -> StunMessage {
    if shared.state().allocations.contains_key(&from) {
        return error(request, 437, "Allocation Mismatch");
    }

    let Ok(socket) = UdpSocket::bind("127.0.0.1:0").await else {
        return error(request, 508, "Insufficient Capacity");
    };
    let socket = Arc::new(socket);
    let Ok(relayed) = socket.local_addr() else {
        return error(request, 508, "Insufficient Capacity");
    };

    let channels = Arc::new(Mutex::new(HashMap::new()));
    let task = tokio::spawn(relay_inbound(
        Arc::clone(shared),
        Arc::clone(&socket),
        Arc::clone(&channels),
        from,
    ));
    shared.state().allocations.insert(
        from,
        Relay {
            socket,
            channels,
            task,
        },
    );

    let lifetime = request.lifetime().unwrap_or(600).min(3600);
    StunMessage::response_to(request, StunClass::SuccessResponse)
        .with_attribute(StunAttribute::XorRelayedAddress(relayed))
        .with_attribute(StunAttribute::XorMappedAddress(from))
        .with_attribute(StunAttribute::Lifetime(lifetime))
}

fn refresh(shared: &Shared, from: SocketAddr, request: &StunMessage) -> StunMessage {
    let lifetime = request.lifetime().unwrap_or(600).min(3600);
    let mut state = shared.state();
    if !state.allocations.contains_key(&from) {
        return error(request, 437, "Allocation Mismatch");
    }
    if lifetime == 0 {
        state.allocations.remove(&from);
    }
    StunMessage::response_to(request, StunClass::SuccessResponse)
        .with_attribute(StunAttribute::Lifetime(lifetime))
}

fn channel_bind(shared: &Shared, from: SocketAddr, request: &StunMessage) -> StunMessage {
    let (Some(channel), Some(peer)) = (request.channel_number(), request.xor_peer_address()) else {
        return error(request, 400, "Bad Request");
    };
    let state = shared.state();
    let Some(relay) = state.allocations.get(&from) else {
        return error(request, 437, "Allocation Mismatch");
    };

    let mut channels = relay.channels.lock().unwrap_or_else(|e| e.into_inner());
    let conflict = channels
        .iter()
        .any(|(&bound, &bound_peer)| (bound == channel) != (bound_peer == peer));
    if conflict {
        return error(request, 400, "Bad Request");
    }
    channels.insert(channel, peer);
    StunMessage::response_to(request, StunClass::SuccessResponse)
}

/// Forward datagrams arriving at a relayed address to the owning client
async fn relay_inbound(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    channels: Arc<Mutex<HashMap<u16, SocketAddr>>>,
    client: SocketAddr,
) {
    let mut buf = vec![0u8; 65536];
    loop {
        let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
            continue;
        };
        let payload = buf[..len].to_vec();

        let channel = channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|&(_, &bound)| bound == peer)
            .map(|(&channel, _)| channel);

        let datagram = match channel {
            Some(channel) => ChannelData::new(channel, payload).encode(),
            None => StunMessage::new(StunMethod::Data, StunClass::Indication)
                .with_attribute(StunAttribute::XorPeerAddress(peer))
                .with_attribute(StunAttribute::Data(payload))
                .encode(),
        };
        let _ = shared.socket.send_to(&datagram, client).await;
    }
}
