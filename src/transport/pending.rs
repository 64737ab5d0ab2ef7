//! Request/response correlation for proxied vehicle requests.
//!
//! A request is registered with [`PendingRequests::begin`], which returns a
//! single-use [`PendingResponse`] slot. The vehicle's answer arrives later
//! on the connection's read loop and is handed over with
//! [`PendingRequests::deliver`].
//!
//! # Guarantees
//!
//! - Delivery before the wait starts is buffered: the wait returns at once.
//! - Delivery for an unknown, expired or already-answered ID is discarded.
//! - Beginning a request under an in-flight ID replaces the old slot; the
//!   old waiter returns `None` immediately.
//! - A timed-out or cancelled wait removes only its own slot, never a newer one.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::identifiers::RequestId;

// ============================================================================
// Types
// ============================================================================

/// Sender half stored in the table, tagged with the slot generation.
struct Slot {
    generation: u64,
    tx: oneshot::Sender<String>,
}

/// Map of request IDs to response slots.
type CorrelationMap = FxHashMap<RequestId, Slot>;

// ============================================================================
// PendingResponse
// ============================================================================

/// Handle for one outstanding request, consumed by [`PendingRequests::wait`].
#[derive(Debug)]
pub struct PendingResponse {
    request_id: RequestId,
    generation: u64,
    rx: oneshot::Receiver<String>,
}

impl PendingResponse {
    /// Returns the correlated request ID.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

/// Removes its slot when a wait finishes or is dropped mid-flight.
struct SlotGuard<'a> {
    table: &'a PendingRequests,
    request_id: &'a RequestId,
    generation: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.table.remove_slot(self.request_id, self.generation);
    }
}

// ============================================================================
// PendingRequests
// ============================================================================

/// Per-connection correlation table.
///
/// Guarded by its own lock so requests against different vehicles never
/// contend with each other or with the pool.
#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<CorrelationMap>,
    generation: AtomicU64,
}

impl PendingRequests {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slot for `request_id`, replacing any in-flight slot.
    pub fn begin(&self, request_id: RequestId) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let replaced = self
            .slots
            .lock()
            .insert(request_id.clone(), Slot { generation, tx });

        if replaced.is_some() {
            debug!(%request_id, "Replaced in-flight request slot");
        }

        PendingResponse {
            request_id,
            generation,
            rx,
        }
    }

    /// Fulfils the slot for `request_id`.
    ///
    /// Returns `false` and drops the payload if no live slot exists.
    pub fn deliver(&self, request_id: &RequestId, payload: String) -> bool {
        let Some(slot) = self.slots.lock().remove(request_id) else {
            debug!(%request_id, "Discarding response for unknown request");
            return false;
        };

        // The waiter may have timed out between our removal and this send.
        let delivered = slot.tx.send(payload).is_ok();
        trace!(%request_id, delivered, "Response delivered");
        delivered
    }

    /// Waits for the response to `pending`, up to `wait`.
    ///
    /// Returns `None` on timeout, on replacement by a newer request with
    /// the same ID, or when the table is cancelled.
    pub async fn wait(&self, pending: PendingResponse, wait: Duration) -> Option<String> {
        let PendingResponse {
            request_id,
            generation,
            rx,
        } = pending;

        // Releases the slot however the wait ends, including cancellation.
        let _slot = SlotGuard {
            table: self,
            request_id: &request_id,
            generation,
        };

        match timeout(wait, rx).await {
            Ok(Ok(payload)) => Some(payload),
            Ok(Err(_)) => {
                debug!(%request_id, "Request slot dropped before delivery");
                None
            }
            Err(_) => {
                debug!(%request_id, timeout_ms = wait.as_millis() as u64, "Request timed out");
                None
            }
        }
    }

    /// Gives up on `pending` without waiting, e.g. when the request could
    /// not be sent.
    pub fn abandon(&self, pending: PendingResponse) {
        self.remove_slot(&pending.request_id, pending.generation);
    }

    /// Removes the slot for `request_id` only if it is still `generation`.
    fn remove_slot(&self, request_id: &RequestId, generation: u64) {
        let mut slots = self.slots.lock();
        if slots
            .get(request_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            slots.remove(request_id);
        }
    }

    /// Drops every outstanding slot, waking all waiters with `None`.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        let count = drained.len();

        if count > 0 {
            debug!(count, "Cancelled pending requests");
        }

        count
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` if no request is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
