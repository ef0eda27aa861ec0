//! Network reachability as an injected collaborator.
//!
//! `TurnSocket` consults a `NetworkMonitor` before each refresh tick. The
//! platform layer (or a test) drives a `NetworkSignal`; nothing here is
//! process-global.

use tokio::sync::watch;

/// Source of network reachability
pub trait NetworkMonitor: Send + Sync {
    /// Whether the network is currently usable
    fn is_available(&self) -> bool;

    /// Subscribe to availability changes
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Reachability flag backed by a watch channel.
///
/// # Examples
///
/// ```
/// use turnpike_relay::network::{NetworkMonitor, NetworkSignal};
///
/// let signal = NetworkSignal::new(true);
/// let mut changes = signal.subscribe();
/// signal.set_available(false);
/// assert!(!signal.is_available());
/// assert!(changes.has_changed().unwrap());
/// ```
#[derive(Debug)]
pub struct NetworkSignal {
    tx: watch::Sender<bool>,
}

impl NetworkSignal {
    /// Create a signal with the given initial state.
    #[must_use]
    pub fn new(available: bool) -> Self {
        let (tx, _) = watch::channel(available);
        Self { tx }
    }

    /// Report a reachability change. Subscribers are only woken when the
    /// value actually changes.
    pub fn set_available(&self, available: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == available {
                false
            } else {
                *current = available;
                true
            }
        });
        if changed {
            tracing::info!("Network {}", if available { "available" } else { "unavailable" });
        }
    }
}

impl Default for NetworkSignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for NetworkSignal {
    fn is_available(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
