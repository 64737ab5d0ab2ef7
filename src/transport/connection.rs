//! Gateway-side view of one WebSocket peer.
//!
//! A [`Connection`] owns the send path, the closed flag, the liveness
//! timestamp and the pending-request table of one vehicle or client. The
//! socket itself lives in two tasks spawned by the server: a read loop that
//! feeds the router, and a writer that drains the [`Outbound`] channel.
//!
//! # Send Path
//!
//! ```text
//! send() ──► mpsc::UnboundedSender<Outbound> ──► writer task ──► WebSocket
//! close() ─► Outbound::Close ─────────────────►   (close + exit)
//! ```
//!
//! Sending never waits on the peer: frames queue in the channel and a dead
//! peer surfaces as a write error in the writer task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, DeviceId, RequestId};
use crate::protocol::ConnectionKind;

use super::pending::{PendingRequests, PendingResponse};

// ============================================================================
// Outbound
// ============================================================================

/// Frame queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(String),
    /// Close the socket and stop writing.
    Close,
}

/// Receiving half of a connection's send path.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

// ============================================================================
// LinkState
// ============================================================================

/// Fields guarded by the per-connection lock.
struct LinkState {
    closed: bool,
    last_alive: Instant,
}

// ============================================================================
// Connection
// ============================================================================

/// One vehicle or client connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and shared as `Arc<Connection>` between
/// its read loop, the pool, the liveness monitor and routing calls. The
/// closed flag and liveness timestamp have their own lock, independent of
/// the pool's.
pub struct Connection {
    /// Process-unique ID.
    id: ConnectionId,
    /// Kind assigned at handshake, before any promotion.
    initial_kind: ConnectionKind,
    /// Vehicle identity, set at most once.
    device_id: OnceLock<DeviceId>,
    /// Closed flag and last liveness signal.
    state: Mutex<LinkState>,
    /// Send path to the writer task.
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Fires once when the connection closes.
    closed_tx: watch::Sender<bool>,
    /// Outstanding proxied requests.
    pending: PendingRequests,
    /// Peer address, when known.
    remote_addr: Option<SocketAddr>,
    /// Handshake time.
    connected_at: Instant,
}

impl Connection {
    /// Creates a connection and the receiver its writer task drains.
    ///
    /// A `device_id` classifies the connection as a vehicle; `None` makes
    /// it a client that may later be promoted.
    #[must_use]
    pub fn new(device_id: Option<DeviceId>) -> (Arc<Self>, OutboundReceiver) {
        Self::with_remote_addr(device_id, None)
    }

    /// Creates a connection that remembers its peer address.
    #[must_use]
    pub fn with_remote_addr(
        device_id: Option<DeviceId>,
        remote_addr: Option<SocketAddr>,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let now = Instant::now();

        let initial_kind = if device_id.is_some() {
            ConnectionKind::Device
        } else {
            ConnectionKind::Client
        };

        let slot = OnceLock::new();
        if let Some(device_id) = device_id {
            let _ = slot.set(device_id);
        }

        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            initial_kind,
            device_id: slot,
            state: Mutex::new(LinkState {
                closed: false,
                last_alive: now,
            }),
            outbound,
            closed_tx,
            pending: PendingRequests::new(),
            remote_addr,
            connected_at: now,
        });

        (connection, outbound_rx)
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the vehicle ID, if this connection is a vehicle.
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.get()
    }

    /// Returns the current connection kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        if self.device_id.get().is_some() {
            ConnectionKind::Device
        } else {
            self.initial_kind
        }
    }

    /// Returns `true` if this connection is a vehicle.
    #[inline]
    #[must_use]
    pub fn is_device(&self) -> bool {
        self.kind() == ConnectionKind::Device
    }

    /// Returns the peer address, if known.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns when the handshake completed.
    #[inline]
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Returns the time of the last liveness signal.
    #[inline]
    #[must_use]
    pub fn last_alive(&self) -> Instant {
        self.state.lock().last_alive
    }

    /// Returns `true` if the last liveness signal is older than `timeout` at `now`.
    #[inline]
    #[must_use]
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_alive()) > timeout
    }

    /// Returns `true` once [`close`](Self::close) has run.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

// ============================================================================
// Connection - Send Path
// ============================================================================

impl Connection {
    /// Queues a text frame for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is closed or
    /// its writer task has gone away.
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::connection_closed(self.id));
        }

        self.outbound
            .send(Outbound::Text(frame.into()))
            .map_err(|_| Error::connection_closed(self.id))
    }

    /// Closes the connection.
    ///
    /// Idempotent: returns `true` only for the call that actually closed it.
    /// Pending requests are cancelled so their waiters return at once.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            let _ = self.outbound.send(Outbound::Close);
        }

        self.closed_tx.send_replace(true);
        self.pending.cancel_all();

        debug!(conn_id = %self.id, "Connection closed");
        true
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Records a liveness signal.
    pub fn mark_alive(&self) {
        self.state.lock().last_alive = Instant::now();
    }

    /// Sets the vehicle ID for a promotion.
    ///
    /// Returns `true` if the connection now carries `device_id`, `false` if
    /// it was already promoted under a different ID.
    pub(crate) fn promote(&self, device_id: &DeviceId) -> bool {
        match self.device_id.set(device_id.clone()) {
            Ok(()) => true,
            Err(_) => self.device_id.get() == Some(device_id),
        }
    }
}

// ============================================================================
// Connection - Proxied Requests
// ============================================================================

impl Connection {
    /// Registers a pending request under `request_id`.
    ///
    /// An in-flight request with the same ID is silently replaced.
    pub fn begin_request(&self, request_id: RequestId) -> PendingResponse {
        self.pending.begin(request_id)
    }

    /// Waits up to `timeout` for the response to `pending`.
    ///
    /// Returns `None` on timeout; the slot is removed.
    pub async fn await_response(
        &self,
        pending: PendingResponse,
        timeout: Duration,
    ) -> Option<String> {
        self.pending.wait(pending, timeout).await
    }

    /// Drops `pending` without waiting for a response.
    pub fn abandon_request(&self, pending: PendingResponse) {
        self.pending.abandon(pending);
    }

    /// Hands a response to its waiter.
    ///
    /// Unknown, expired and duplicate IDs are discarded; returns whether a
    /// waiter received the payload.
    pub fn deliver_response(&self, request_id: &RequestId, payload: String) -> bool {
        self.pending.deliver(request_id, payload)
    }

    /// Returns the number of outstanding proxied requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("device_id", &self.device_id.get())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
