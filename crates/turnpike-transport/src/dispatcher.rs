//! Single receive loop per socket with observer fan-out.
//!
//! A `Dispatcher` owns the only task reading from a transport. Every
//! datagram is copied to each registered observer through a bounded channel.
//! Delivery uses `try_send`: a slow observer loses datagrams (logged) instead
//! of stalling the loop for everyone else.

use crate::RECV_BUFFER_SIZE;
use crate::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender address
    pub from: SocketAddr,
    /// Payload bytes
    pub data: Vec<u8>,
}

/// Handle identifying a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observers = Arc<Mutex<HashMap<ObserverId, mpsc::Sender<Datagram>>>>;

/// Owns the receive loop of one transport.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    observers: Observers,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start the receive loop for `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(transport: Arc<dyn Transport>) -> Self {
        let observers: Observers = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(receive_loop(
            transport.clone(),
            observers.clone(),
            shutdown_rx,
        ));

        Self {
            transport,
            observers,
            next_id: AtomicU64::new(0),
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register an observer with a channel of the given capacity.
    pub fn subscribe(&self, capacity: usize) -> (ObserverId, mpsc::Receiver<Datagram>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().insert(id, tx);
        (id, rx)
    }

    /// Remove an observer. Its receiver sees the channel close.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.lock_observers().remove(&id);
    }

    /// Number of registered observers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.lock_observers().len()
    }

    /// Transport this dispatcher reads from
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Stop the receive loop, close the transport and drop all observers.
    ///
    /// Returns once the loop task has finished.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Transport close failed: {}", e);
        }
        self.lock_observers().clear();
    }

    /// Whether the receive loop is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<Datagram>>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

async fn receive_loop(
    transport: Arc<dyn Transport>,
    observers: Observers,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = transport.recv_from(&mut buf) => result,
        };

        match received {
            Ok((len, from)) => {
                tracing::trace!("Received {} bytes from {}", len, from);
                fan_out(&observers, Datagram {
                    from,
                    data: buf[..len].to_vec(),
                });
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                // ICMP port unreachable surfaces as a recv error on some platforms
                tracing::debug!("Receive error: {}", e);
            }
        }
    }

    tracing::debug!("Receive loop stopped");
}

fn fan_out(observers: &Observers, datagram: Datagram) {
    let mut observers = observers.lock().unwrap_or_else(|e| e.into_inner());
    observers.retain(|id, tx| match tx.try_send(datagram.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Observer {:?} is full, dropping datagram from {}", id, datagram.from);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}
