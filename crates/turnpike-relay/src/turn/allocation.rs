//! Allocation state and the channel-binding registry.

use super::error::TurnError;
use crate::candidate::{IceCandidate, sort_by_priority};
use crate::stun::{MAX_CHANNEL, MIN_CHANNEL};
use crate::timer::ExpireTimer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// A relayed transport address leased from the server
#[derive(Debug, Clone)]
pub struct Allocation {
    relayed: SocketAddr,
    mapped: SocketAddr,
    lifetime: Duration,
    protocol: u8,
    timer: ExpireTimer,
}

impl Allocation {
    /// Allocation granted for `lifetime`, starting now.
    #[must_use]
    pub fn new(relayed: SocketAddr, mapped: SocketAddr, lifetime: Duration, protocol: u8) -> Self {
        Self {
            relayed,
            mapped,
            lifetime,
            protocol,
            timer: ExpireTimer::new(lifetime),
        }
    }

    /// Relayed address (XOR-RELAYED-ADDRESS)
    #[must_use]
    pub fn relayed(&self) -> SocketAddr {
        self.relayed
    }

    /// Server-reflexive address (XOR-MAPPED-ADDRESS)
    #[must_use]
    pub fn mapped(&self) -> SocketAddr {
        self.mapped
    }

    /// Lifetime last granted
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// IANA protocol number of the relay (17 for UDP)
    #[must_use]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Expiry timer
    #[must_use]
    pub fn timer(&self) -> &ExpireTimer {
        &self.timer
    }

    /// Record a successful refresh granting `lifetime`.
    pub fn refreshed(&mut self, lifetime: Duration) {
        self.lifetime = lifetime;
        self.timer.reset_with(lifetime);
    }

    /// Relay and server-reflexive candidates, highest priority first
    #[must_use]
    pub fn candidates(&self) -> Vec<IceCandidate> {
        let mut candidates = vec![
            IceCandidate::relay(self.relayed, self.mapped),
            IceCandidate::server_reflexive(self.mapped, None),
        ];
        sort_by_priority(&mut candidates);
        candidates
    }
}

/// One peer's channel binding.
///
/// A binding starts unconfirmed with one CHANNEL-BIND in flight. It becomes
/// confirmed when any bind for it succeeds, and is removed if every bind
/// attempted before that fails.
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    peer: SocketAddr,
    channel: u16,
    enabled: bool,
    confirmed: bool,
    binds_in_flight: u32,
    timer: ExpireTimer,
}

impl ChannelBinding {
    fn new(peer: SocketAddr, channel: u16, lifetime: Duration) -> Self {
        Self {
            peer,
            channel,
            enabled: true,
            confirmed: false,
            binds_in_flight: 1,
            // Rebind at half-life: the permission a bind installs lasts 300 s
            timer: ExpireTimer::with_margin(lifetime, lifetime / 2),
        }
    }

    /// Peer address
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Channel number
    #[must_use]
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Whether the binding is refreshed and usable for sends
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the server has accepted a CHANNEL-BIND for it
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    fn is_usable(&self) -> bool {
        self.enabled && self.confirmed
    }

    /// Expiry timer
    #[must_use]
    pub fn timer(&self) -> &ExpireTimer {
        &self.timer
    }
}

/// Outcome of `ChannelRegistry::reserve`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Peer already had a confirmed binding; it is enabled again
    Existing(u16),
    /// Peer's binding is still being bound; the caller sends its own
    /// CHANNEL-BIND for the same number
    Pending(u16),
    /// Fresh channel number drawn from the pool; needs a CHANNEL-BIND
    New(u16),
}

impl Reservation {
    /// Channel number either way
    #[must_use]
    pub fn channel(self) -> u16 {
        match self {
            Self::Existing(channel) | Self::Pending(channel) | Self::New(channel) => channel,
        }
    }
}

/// Channel bindings indexed by peer and by channel number.
///
/// Both indices are updated together by every mutating method. A channel
/// number stays out of the pool until its binding is removed, which for a
/// disabled binding happens only at expiry.
#[derive(Debug)]
pub struct ChannelRegistry {
    by_peer: HashMap<SocketAddr, ChannelBinding>,
    by_channel: HashMap<u16, SocketAddr>,
    next_channel: u16,
    lifetime: Duration,
}

impl ChannelRegistry {
    /// Empty registry whose bindings last `lifetime`.
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            by_peer: HashMap::new(),
            by_channel: HashMap::new(),
            next_channel: MIN_CHANNEL,
            lifetime,
        }
    }

    /// Ensure `peer` has a binding.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::ChannelsExhausted` if all 16384 numbers are taken.
    pub fn reserve(&mut self, peer: SocketAddr) -> Result<Reservation, TurnError> {
        if let Some(binding) = self.by_peer.get_mut(&peer) {
            binding.enabled = true;
            if binding.confirmed {
                return Ok(Reservation::Existing(binding.channel));
            }
            binding.binds_in_flight += 1;
            return Ok(Reservation::Pending(binding.channel));
        }

        let channel = self.next_free().ok_or(TurnError::ChannelsExhausted)?;
        self.by_peer
            .insert(peer, ChannelBinding::new(peer, channel, self.lifetime));
        self.by_channel.insert(channel, peer);
        Ok(Reservation::New(channel))
    }

    /// Record a successful CHANNEL-BIND for `peer` on `channel`, either the
    /// first one or a refresh.
    pub fn confirm(&mut self, peer: SocketAddr, channel: u16) {
        if let Some(binding) = self.by_peer.get_mut(&peer).filter(|b| b.channel == channel) {
            if !binding.confirmed {
                binding.binds_in_flight = binding.binds_in_flight.saturating_sub(1);
            }
            binding.confirmed = true;
            binding.timer.reset();
        }
    }

    /// Record a failed CHANNEL-BIND from a reservation. The binding is
    /// removed once no bind is left in flight and none has succeeded.
    pub fn discard(&mut self, peer: SocketAddr, channel: u16) {
        let Some(binding) = self.by_peer.get_mut(&peer).filter(|b| b.channel == channel) else {
            return;
        };
        if binding.confirmed {
            return;
        }
        binding.binds_in_flight = binding.binds_in_flight.saturating_sub(1);
        if binding.binds_in_flight == 0 {
            self.by_peer.remove(&peer);
            self.by_channel.remove(&channel);
        }
    }

    /// Stop refreshing and sending on `peer`'s binding.
    ///
    /// Returns whether a binding existed.
    pub fn disable(&mut self, peer: SocketAddr) -> bool {
        match self.by_peer.get_mut(&peer) {
            Some(binding) => {
                binding.enabled = false;
                true
            }
            None => false,
        }
    }

    /// Channel bound to `peer`, enabled or not
    #[must_use]
    pub fn get_channel(&self, peer: SocketAddr) -> Option<u16> {
        self.by_peer.get(&peer).map(|b| b.channel)
    }

    /// Channel of an enabled, confirmed binding to `peer`
    #[must_use]
    pub fn enabled_channel(&self, peer: SocketAddr) -> Option<u16> {
        self.by_peer
            .get(&peer)
            .filter(|b| b.is_usable())
            .map(|b| b.channel)
    }

    /// Peer bound to `channel`
    #[must_use]
    pub fn get_peer(&self, channel: u16) -> Option<SocketAddr> {
        self.by_channel.get(&channel).copied()
    }

    /// Binding for `peer`
    #[must_use]
    pub fn get(&self, peer: SocketAddr) -> Option<&ChannelBinding> {
        self.by_peer.get(&peer)
    }

    /// Enabled bindings whose timer is close to expiring
    #[must_use]
    pub fn due_for_refresh(&self) -> Vec<(SocketAddr, u16)> {
        self.by_peer
            .values()
            .filter(|b| b.is_usable() && b.timer.is_close_to_expiring())
            .map(|b| (b.peer, b.channel))
            .collect()
    }

    /// Peers of every enabled binding
    #[must_use]
    pub fn enabled_peers(&self) -> Vec<SocketAddr> {
        self.by_peer
            .values()
            .filter(|b| b.enabled)
            .map(|b| b.peer)
            .collect()
    }

    /// Remove bindings whose timer has run out, returning them.
    pub fn purge_expired(&mut self) -> Vec<(SocketAddr, u16)> {
        let expired: Vec<(SocketAddr, u16)> = self
            .by_peer
            .values()
            .filter(|b| b.timer.is_expired())
            .map(|b| (b.peer, b.channel))
            .collect();

        for (peer, channel) in &expired {
            self.by_peer.remove(peer);
            self.by_channel.remove(channel);
        }
        expired
    }

    /// Drop every binding and return all numbers to the pool.
    pub fn clear(&mut self) {
        self.by_peer.clear();
        self.by_channel.clear();
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    /// Whether there are no bindings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }

    /// Whether the two indices describe the same bindings
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.by_peer.len() == self.by_channel.len()
            && self
                .by_channel
                .iter()
                .all(|(channel, peer)| self.by_peer.get(peer).is_some_and(|b| b.channel == *channel))
    }

    /// Next unused number, searching cyclically from the last one handed out
    fn next_free(&mut self) -> Option<u16> {
        let range = u32::from(MAX_CHANNEL - MIN_CHANNEL) + 1;
        for _ in 0..range {
            let candidate = self.next_channel;
            self.next_channel = if candidate == MAX_CHANNEL {
                MIN_CHANNEL
            } else {
                candidate + 1
            };
            if !self.by_channel.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}
