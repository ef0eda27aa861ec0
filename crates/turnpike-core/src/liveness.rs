//! Connection liveness.
//!
//! Each tracked peer is `Active` or `Inactive`; removal deletes the record.
//! An active peer that stays quiet for the ping interval is due a ping. If
//! no pong arrives within the ping timeout it goes inactive and its
//! reconnect timer starts. Any traffic or pong brings an inactive peer back.
//! A peer still inactive when the reconnect timer expires is removed.
//!
//! `ConnectionRegistry` is the synchronous state machine. `LivenessMonitor`
//! drives its tick on a timer and publishes the events, and
//! `LivenessHandle` lets connections report traffic through the same
//! channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turnpike_relay::ExpireTimer;

use crate::config::LivenessConfig;

/// Liveness state of a tracked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Peer is responding
    Active,
    /// Peer missed a ping; waiting for it to come back
    Inactive,
}

/// State-change notifications. Each transition edge is reported once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Peer has been quiet for the ping interval; send it a ping
    PingDue(SocketAddr),
    /// Peer missed its pong deadline
    Inactive(SocketAddr),
    /// Inactive peer was heard from again
    Active(SocketAddr),
    /// Inactive peer did not return in time; record deleted
    Removed(SocketAddr),
}

#[derive(Debug)]
struct Tracked {
    state: ConnectionState,
    ping: ExpireTimer,
    pong_deadline: Option<ExpireTimer>,
    reconnect: Option<ExpireTimer>,
}

/// Liveness records for all connections
#[derive(Debug)]
pub struct ConnectionRegistry {
    config: LivenessConfig,
    connections: HashMap<SocketAddr, Tracked>,
}

impl ConnectionRegistry {
    /// Empty registry
    #[must_use]
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
        }
    }

    /// Start tracking `peer`. An `Inactive` start arms the reconnect timer.
    /// Re-adding a tracked peer resets its record.
    pub fn add(&mut self, peer: SocketAddr, initial: ConnectionState) {
        let reconnect = (initial == ConnectionState::Inactive)
            .then(|| ExpireTimer::new(self.config.reconnect_timeout));
        self.connections.insert(
            peer,
            Tracked {
                state: initial,
                ping: ExpireTimer::new(self.config.ping_interval),
                pong_deadline: None,
                reconnect,
            },
        );
        tracing::debug!(%peer, state = ?initial, "tracking connection");
    }

    /// Stop tracking `peer` without an event
    pub fn remove(&mut self, peer: SocketAddr) -> bool {
        self.connections.remove(&peer).is_some()
    }

    /// Current state, `None` once removed
    #[must_use]
    pub fn state(&self, peer: SocketAddr) -> Option<ConnectionState> {
        self.connections.get(&peer).map(|t| t.state)
    }

    /// Tracked connection count
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Record application traffic from `peer`. Returns `Active` when this
    /// brings an inactive peer back.
    pub fn on_traffic(&mut self, peer: SocketAddr) -> Option<LivenessEvent> {
        let tracked = self.connections.get_mut(&peer)?;
        tracked.ping.reset();
        tracked.pong_deadline = None;

        if tracked.state == ConnectionState::Inactive {
            tracked.state = ConnectionState::Active;
            tracked.reconnect = None;
            tracing::info!(%peer, "connection active");
            return Some(LivenessEvent::Active(peer));
        }
        None
    }

    /// Record a pong from `peer`; same effect as traffic
    pub fn on_pong(&mut self, peer: SocketAddr) -> Option<LivenessEvent> {
        self.on_traffic(peer)
    }

    /// Advance every record and collect the transitions
    pub fn tick(&mut self) -> Vec<LivenessEvent> {
        let mut events = Vec::new();
        let ping_timeout = self.config.ping_timeout;
        let reconnect_timeout = self.config.reconnect_timeout;

        self.connections.retain(|&peer, tracked| match tracked.state {
            ConnectionState::Active => {
                let missed = tracked
                    .pong_deadline
                    .as_ref()
                    .is_some_and(ExpireTimer::is_expired);

                if missed {
                    tracked.state = ConnectionState::Inactive;
                    tracked.pong_deadline = None;
                    tracked.reconnect = Some(ExpireTimer::new(reconnect_timeout));
                    tracing::info!(%peer, "connection inactive");
                    events.push(LivenessEvent::Inactive(peer));
                } else if tracked.pong_deadline.is_none() && tracked.ping.is_expired() {
                    tracked.pong_deadline = Some(ExpireTimer::new(ping_timeout));
                    tracing::trace!(%peer, "ping due");
                    events.push(LivenessEvent::PingDue(peer));
                }
                true
            }
            ConnectionState::Inactive => {
                let expired = tracked
                    .reconnect
                    .as_ref()
                    .is_none_or(ExpireTimer::is_expired);
                if expired {
                    tracing::info!(%peer, "connection removed");
                    events.push(LivenessEvent::Removed(peer));
                }
                !expired
            }
        });

        events
    }
}

/// Shared access to a registry that publishes transitions
#[derive(Debug, Clone)]
pub struct LivenessHandle {
    registry: Arc<Mutex<ConnectionRegistry>>,
    events: mpsc::UnboundedSender<LivenessEvent>,
}

impl LivenessHandle {
    fn registry(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: Option<LivenessEvent>) {
        if let Some(event) = event {
            if self.events.send(event).is_err() {
                tracing::debug!(?event, "liveness receiver dropped");
            }
        }
    }

    /// Start tracking `peer`
    pub fn add(&self, peer: SocketAddr, initial: ConnectionState) {
        self.registry().add(peer, initial);
    }

    /// Stop tracking `peer`
    pub fn remove(&self, peer: SocketAddr) -> bool {
        self.registry().remove(peer)
    }

    /// Current state of `peer`
    #[must_use]
    pub fn state(&self, peer: SocketAddr) -> Option<ConnectionState> {
        self.registry().state(peer)
    }

    /// Report traffic from `peer`
    pub fn on_traffic(&self, peer: SocketAddr) {
        let event = self.registry().on_traffic(peer);
        self.publish(event);
    }

    /// Report a pong from `peer`
    pub fn on_pong(&self, peer: SocketAddr) {
        let event = self.registry().on_pong(peer);
        self.publish(event);
    }
}

/// Periodic liveness scheduler shared by all connections
#[derive(Debug)]
pub struct LivenessMonitor {
    handle: LivenessHandle,
    task: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Start ticking every `config.tick`. Must be called inside a Tokio
    /// runtime.
    #[must_use]
    pub fn start(config: LivenessConfig) -> (Self, mpsc::UnboundedReceiver<LivenessEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let tick = config.tick;
        let handle = LivenessHandle {
            registry: Arc::new(Mutex::new(ConnectionRegistry::new(config))),
            events,
        };

        let ticker = handle.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let events = ticker.registry().tick();
                for event in events {
                    if ticker.events.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        (Self { handle, task }, rx)
    }

    /// Handle for connections and the application
    #[must_use]
    pub fn handle(&self) -> LivenessHandle {
        self.handle.clone()
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
