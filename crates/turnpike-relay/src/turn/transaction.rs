//! Pending request table keyed by transaction id.

use crate::stun::{StunMessage, TransactionId};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Outstanding requests awaiting a response.
///
/// Shared by the request path (register) and the receive path (complete);
/// one mutex serializes both.
#[derive(Debug, Default)]
pub struct PendingTransactions {
    pending: Mutex<HashMap<TransactionId, oneshot::Sender<StunMessage>>>,
}

impl PendingTransactions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its response will arrive on.
    ///
    /// Re-registering an id replaces the previous waiter, whose receiver
    /// then resolves to an error.
    pub fn register(&self, id: TransactionId) -> oneshot::Receiver<StunMessage> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Hand a response to its waiter.
    ///
    /// Returns `false` (and drops the message) when no request with that id
    /// is pending.
    pub fn complete(&self, message: StunMessage) -> bool {
        let waiter = self.lock().remove(&message.transaction_id);
        match waiter {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                tracing::debug!(
                    "Dropping response for unknown transaction {}",
                    message.transaction_id
                );
                false
            }
        }
    }

    /// Forget `id` without completing it.
    pub fn remove(&self, id: &TransactionId) {
        self.lock().remove(id);
    }

    /// Drop every waiter; their receivers resolve to an error.
    pub fn cancel_all(&self) {
        let cancelled = std::mem::take(&mut *self.lock());
        if !cancelled.is_empty() {
            tracing::debug!("Cancelled {} pending transactions", cancelled.len());
        }
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TransactionId, oneshot::Sender<StunMessage>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
