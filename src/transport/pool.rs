//! Connection registry for vehicles and front-end clients.
//!
//! The pool is the single source of truth for who is connected. It keeps
//! every connection by [`ConnectionId`], and partitions them into clients
//! (by connection ID) and vehicles (by [`DeviceId`]).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ConnectionPool                │
//! │  connections: conn_1, conn_2, conn_3, ...    │
//! │  ┌──────────────────┐ ┌───────────────────┐  │
//! │  │ clients          │ │ devices           │  │
//! │  │ conn_2 → Conn    │ │ vehicle-001 → Conn│  │
//! │  │ conn_3 → Conn    │ │ vehicle-002 → Conn│  │
//! │  └──────────────────┘ └───────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Roster Notifications
//!
//! Mutations run in two phases: change the maps under the write lock and
//! decide whether the roster changed, then release the lock and schedule
//! the roster handler as its own task. The handler is never called with
//! the lock held, so it may freely read the pool or broadcast.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, DeviceId};
use crate::protocol::RosterEntry;
use crate::transport::Connection;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with a fresh roster whenever the set of vehicles changes.
pub type RosterHandler = Arc<dyn Fn(Vec<RosterEntry>) + Send + Sync>;

/// The three maps guarded by the pool lock.
#[derive(Default)]
struct PoolState {
    /// Every registered connection.
    connections: FxHashMap<ConnectionId, Arc<Connection>>,
    /// Front-end clients.
    clients: FxHashMap<ConnectionId, Arc<Connection>>,
    /// Vehicles, at most one connection per vehicle ID.
    devices: FxHashMap<DeviceId, Arc<Connection>>,
}

impl PoolState {
    /// Returns `true` if `device_id` maps to `connection`.
    fn holds_device(&self, device_id: &DeviceId, connection: &Arc<Connection>) -> bool {
        self.devices
            .get(device_id)
            .is_some_and(|held| Arc::ptr_eq(held, connection))
    }
}

// ============================================================================
// PoolStats
// ============================================================================

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Registered vehicles.
    pub vehicle_count: usize,
    /// Registered clients.
    pub client_count: usize,
    /// All registered connections.
    pub total_count: usize,
    /// Liveness sweep period.
    #[serde(rename = "check_interval_secs", serialize_with = "as_secs")]
    pub check_interval: Duration,
    /// Liveness timeout.
    #[serde(rename = "timeout_secs", serialize_with = "as_secs")]
    pub timeout: Duration,
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Registry of live vehicle and client connections.
///
/// Thread-safe; share it as `Arc<ConnectionPool>`.
///
/// # Example
///
/// ```ignore
/// let pool = Arc::new(ConnectionPool::new(Duration::from_secs(30), Duration::from_secs(60)));
/// pool.set_roster_handler(|roster| println!("{} vehicles online", roster.len()));
/// let monitor = pool.start_liveness_monitor();
///
/// let (vehicle, _outbound) = Connection::new(Some(DeviceId::new("vehicle-001")));
/// pool.add(Arc::clone(&vehicle))?;
/// pool.route_to_device(&DeviceId::new("vehicle-001"), frame)?;
/// ```
pub struct ConnectionPool {
    /// Connection maps.
    state: RwLock<PoolState>,

    /// Roster-changed callback.
    roster_handler: RwLock<Option<RosterHandler>>,

    /// Liveness sweep period.
    check_interval: Duration,

    /// Liveness timeout.
    timeout: Duration,

    /// Stops the liveness monitor.
    shutdown: watch::Sender<bool>,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates an empty pool with the given liveness settings.
    #[must_use]
    pub fn new(check_interval: Duration, timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            state: RwLock::new(PoolState::default()),
            roster_handler: RwLock::new(None),
            check_interval,
            timeout,
            shutdown,
        }
    }

    /// Sets the callback announcing roster changes.
    pub fn set_roster_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<RosterEntry>) + Send + Sync + 'static,
    {
        *self.roster_handler.write() = Some(Arc::new(handler));
    }
}

// ============================================================================
// ConnectionPool - Membership
// ============================================================================

impl ConnectionPool {
    /// Registers a new connection.
    ///
    /// Vehicles go into the vehicle map and trigger a roster notification;
    /// everything else goes into the client map.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateConnection`] if the connection ID is already registered
    /// - [`Error::DeviceAlreadyConnected`] if another connection holds its vehicle ID
    pub fn add(&self, connection: Arc<Connection>) -> Result<()> {
        let conn_id = connection.id();

        let notify = {
            let mut state = self.state.write();

            if state.connections.contains_key(&conn_id) {
                return Err(Error::duplicate_connection(conn_id));
            }

            match connection.device_id() {
                Some(device_id) => {
                    if state.devices.contains_key(device_id) {
                        return Err(Error::device_already_connected(device_id.clone()));
                    }
                    state
                        .devices
                        .insert(device_id.clone(), Arc::clone(&connection));
                    state.connections.insert(conn_id, connection);
                    true
                }
                None => {
                    state.clients.insert(conn_id, Arc::clone(&connection));
                    state.connections.insert(conn_id, connection);
                    false
                }
            }
        };

        debug!(%conn_id, notify, "Connection added to pool");

        if notify {
            self.notify_roster_changed();
        }

        Ok(())
    }

    /// Removes a connection from every map.
    ///
    /// Unknown IDs are ignored. Returns the removed connection.
    pub fn remove(&self, conn_id: ConnectionId) -> Option<Arc<Connection>> {
        let (removed, notify) = {
            let mut state = self.state.write();

            let Some(connection) = state.connections.remove(&conn_id) else {
                return None;
            };

            state.clients.remove(&conn_id);

            let notify = match connection.device_id() {
                Some(device_id) if state.holds_device(device_id, &connection) => {
                    state.devices.remove(device_id);
                    true
                }
                _ => false,
            };

            (connection, notify)
        };

        debug!(%conn_id, notify, "Connection removed from pool");

        if notify {
            self.notify_roster_changed();
        }

        Some(removed)
    }

    /// Promotes a registered client connection to a vehicle.
    ///
    /// The first registration of a vehicle ID wins. Returns `Ok(true)` when
    /// the connection was promoted and `Ok(false)` when it already held this
    /// vehicle ID.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if the connection is not in the pool
    /// - [`Error::DeviceAlreadyConnected`] if another connection holds `device_id`
    /// - [`Error::Protocol`] if the connection is already a different vehicle
    pub fn register_as_device(
        &self,
        connection: &Arc<Connection>,
        device_id: DeviceId,
    ) -> Result<bool> {
        let conn_id = connection.id();

        {
            let mut state = self.state.write();

            if !state.connections.contains_key(&conn_id) {
                return Err(Error::connection_not_found(conn_id));
            }

            if state.holds_device(&device_id, connection) {
                return Ok(false);
            }

            if state.devices.contains_key(&device_id) {
                return Err(Error::device_already_connected(device_id));
            }

            if !connection.promote(&device_id) {
                return Err(Error::protocol(format!(
                    "{conn_id} is already registered as {}",
                    connection
                        .device_id()
                        .map(DeviceId::as_str)
                        .unwrap_or_default()
                )));
            }

            state.clients.remove(&conn_id);
            state.devices.insert(device_id.clone(), Arc::clone(connection));
        }

        connection.mark_alive();
        info!(%conn_id, vehicle_id = %device_id, "Connection registered as vehicle");

        self.notify_roster_changed();
        Ok(true)
    }

    /// Looks up any connection by ID.
    #[must_use]
    pub fn get(&self, conn_id: ConnectionId) -> Option<Arc<Connection>> {
        self.state.read().connections.get(&conn_id).cloned()
    }

    /// Looks up a vehicle connection.
    #[must_use]
    pub fn device(&self, device_id: &DeviceId) -> Option<Arc<Connection>> {
        self.state.read().devices.get(device_id).cloned()
    }
}

// ============================================================================
// ConnectionPool - Routing
// ============================================================================

impl ConnectionPool {
    /// Sends a frame to one vehicle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceOffline`] if the vehicle is not registered, or
    /// its connection is closed or cannot accept frames.
    pub fn route_to_device(&self, device_id: &DeviceId, frame: impl Into<String>) -> Result<()> {
        let connection = self
            .device(device_id)
            .ok_or_else(|| Error::device_offline(device_id.clone()))?;

        if connection.is_closed() {
            return Err(Error::device_offline(device_id.clone()));
        }

        connection
            .send(frame)
            .map_err(|_| Error::device_offline(device_id.clone()))
    }

    /// Sends a frame to every client.
    ///
    /// Every client is attempted even if some fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BroadcastFailed`] with the failure count if any
    /// client could not be reached.
    pub fn broadcast_to_clients(&self, frame: &str) -> Result<()> {
        let clients: Vec<Arc<Connection>> = self.state.read().clients.values().cloned().collect();

        let total = clients.len();
        let failed = clients
            .iter()
            .filter(|client| client.send(frame).is_err())
            .count();

        if failed > 0 {
            return Err(Error::broadcast_failed(failed, total));
        }

        Ok(())
    }

    /// Records a liveness signal for a vehicle. Unknown vehicles are ignored.
    ///
    /// Returns `true` if the vehicle was found.
    pub fn update_liveness(&self, device_id: &DeviceId) -> bool {
        match self.device(device_id) {
            Some(connection) => {
                connection.mark_alive();
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// ConnectionPool - Queries
// ============================================================================

impl ConnectionPool {
    /// Returns the online vehicles, sorted by vehicle ID.
    #[must_use]
    pub fn snapshot_roster(&self) -> Vec<RosterEntry> {
        let mut roster: Vec<RosterEntry> = self
            .state
            .read()
            .devices
            .keys()
            .cloned()
            .map(RosterEntry::online)
            .collect();

        roster.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        roster
    }

    /// Returns the current counters and liveness settings.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.read();

        PoolStats {
            vehicle_count: state.devices.len(),
            client_count: state.clients.len(),
            total_count: state.connections.len(),
            check_interval: self.check_interval,
            timeout: self.timeout,
        }
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Returns the liveness sweep period.
    #[inline]
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Returns the liveness timeout.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ============================================================================
// ConnectionPool - Liveness
// ============================================================================

impl ConnectionPool {
    /// Evicts every vehicle whose last liveness signal is older than the
    /// timeout at `now`.
    ///
    /// Stale vehicles are unlinked under the lock, then closed outside it,
    /// then announced with a single roster notification for the batch.
    pub fn evict_stale(&self, now: Instant) -> Vec<Arc<Connection>> {
        let evicted: Vec<Arc<Connection>> = {
            let mut state = self.state.write();

            let stale: Vec<DeviceId> = state
                .devices
                .iter()
                .filter(|(_, connection)| connection.is_stale(now, self.timeout))
                .map(|(device_id, _)| device_id.clone())
                .collect();

            stale
                .into_iter()
                .filter_map(|device_id| {
                    let connection = state.devices.remove(&device_id)?;
                    state.connections.remove(&connection.id());
                    state.clients.remove(&connection.id());
                    warn!(vehicle_id = %device_id, conn_id = %connection.id(), "Vehicle heartbeat timed out");
                    Some(connection)
                })
                .collect()
        };

        if evicted.is_empty() {
            return evicted;
        }

        for connection in &evicted {
            connection.close();
        }

        self.notify_roster_changed();
        warn!(count = evicted.len(), "Evicted stale vehicles");

        evicted
    }

    /// Signals the liveness monitor to stop.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        debug!("ConnectionPool stop requested");
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Subscribes to the stop signal.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

// ============================================================================
// ConnectionPool - Notifications
// ============================================================================

impl ConnectionPool {
    /// Announces the current roster to the handler without holding the lock.
    ///
    /// The roster is captured now; the handler runs on its own task when a
    /// runtime is available and inline otherwise.
    fn notify_roster_changed(&self) {
        let Some(handler) = self.roster_handler.read().clone() else {
            return;
        };

        let roster = self.snapshot_roster();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { handler(roster) });
            }
            Err(_) => handler(roster),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
