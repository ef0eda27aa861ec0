//! Loopback TURN server answering from a script, for unit tests.

use crate::stun::{ChannelData, StunAttribute, StunClass, StunMessage, StunMethod, is_channel_data};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// How to answer the next request
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    /// Drop the request
    Silent,
    /// 401 with realm and nonce
    Unauthorized {
        realm: &'static str,
        nonce: &'static str,
    },
    /// 438 with a new nonce
    StaleNonce { nonce: &'static str },
    /// Allocate success with relayed/mapped addresses
    AllocateSuccess { lifetime: u32 },
    /// Refresh success
    RefreshSuccess { lifetime: u32 },
    /// Empty success response
    Success,
    /// Arbitrary error response
    Error { code: u16, reason: &'static str },
    /// Success shaped by the request method
    Auto,
}

pub(crate) struct ScriptedServer {
    socket: Arc<UdpSocket>,
    requests: Arc<Mutex<Vec<StunMessage>>>,
    channel_data: Arc<Mutex<Vec<ChannelData>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    task: JoinHandle<()>,
}

pub(crate) const RELAYED_ADDR: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::new(203, 0, 113, 1), 49152));

impl ScriptedServer {
    /// Start answering with `script`; once exhausted every request gets `Reply::Auto`.
    pub(crate) async fn start(script: Vec<Reply>) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let channel_data = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let task = tokio::spawn(serve(
            socket.clone(),
            requests.clone(),
            channel_data.clone(),
            script.clone(),
        ));

        Self {
            socket,
            requests,
            channel_data,
            script,
            task,
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub(crate) fn relayed_addr(&self) -> SocketAddr {
        RELAYED_ADDR
    }

    /// Requests received so far, in arrival order
    pub(crate) fn requests(&self) -> Vec<StunMessage> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests of one method
    pub(crate) fn requests_of(&self, method: StunMethod) -> Vec<StunMessage> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub(crate) fn channel_data(&self) -> Vec<ChannelData> {
        self.channel_data.lock().unwrap().clone()
    }

    /// Queue more replies
    pub(crate) fn push(&self, replies: &[Reply]) {
        self.script.lock().unwrap().extend(replies.iter().copied());
    }

    pub(crate) async fn send_raw(&self, bytes: &[u8], to: SocketAddr) {
        self.socket.send_to(bytes, to).await.unwrap();
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    socket: Arc<UdpSocket>,
    requests: Arc<Mutex<Vec<StunMessage>>>,
    channel_data: Arc<Mutex<Vec<ChannelData>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            continue;
        };

        if is_channel_data(&buf[..len]) {
            if let Ok(frame) = ChannelData::decode(&buf[..len]) {
                channel_data.lock().unwrap().push(frame);
            }
            continue;
        }

        let Ok(request) = StunMessage::decode(&buf[..len]) else {
            continue;
        };
        requests.lock().unwrap().push(request.clone());

        let reply = script.lock().unwrap().pop_front().unwrap_or(Reply::Auto);
        if let Some(response) = answer(&request, reply, from) {
            let _ = socket.send_to(&response.encode(), from).await;
        }
    }
}

fn answer(request: &StunMessage, reply: Reply, from: SocketAddr) -> Option<StunMessage> {
    let success = StunMessage::response_to(request, StunClass::SuccessResponse);
    let error = |code: u16, reason: &str| {
        StunMessage::response_to(request, StunClass::ErrorResponse).with_attribute(
            StunAttribute::ErrorCode {
                code,
                reason: reason.to_string(),
            },
        )
    };

    let response = match reply {
        Reply::Silent => return None,
        Reply::Unauthorized { realm, nonce } => error(401, "Unauthorized")
            .with_attribute(StunAttribute::Realm(realm.to_string()))
            .with_attribute(StunAttribute::Nonce(nonce.to_string())),
        Reply::StaleNonce { nonce } => {
            error(438, "Stale Nonce").with_attribute(StunAttribute::Nonce(nonce.to_string()))
        }
        Reply::AllocateSuccess { lifetime } => success
            .with_attribute(StunAttribute::XorRelayedAddress(RELAYED_ADDR))
            .with_attribute(StunAttribute::XorMappedAddress(from))
            .with_attribute(StunAttribute::Lifetime(lifetime)),
        Reply::RefreshSuccess { lifetime } => success.with_attribute(StunAttribute::Lifetime(lifetime)),
        Reply::Success => success,
        Reply::Error { code, reason } => error(code, reason),
        Reply::Auto => match request.method {
            StunMethod::Allocate => {
                return answer(request, Reply::AllocateSuccess { lifetime: request.lifetime().unwrap_or(600) }, from);
            }
            StunMethod::Refresh => {
                return answer(request, Reply::RefreshSuccess { lifetime: request.lifetime().unwrap_or(600) }, from);
            }
            _ => success,
        },
    };

    Some(response)
}
