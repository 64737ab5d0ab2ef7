//! Message dispatch between clients and vehicles.
//!
//! The router is stateless: each decoded [`Envelope`] is routed by its type
//! tag together with the connection it arrived on.
//!
//! # Dispatch Table
//!
//! | Type | Action |
//! |------|--------|
//! | `execute_code`, `stop_execution` | Route to the named vehicle |
//! | `emergency_stop` | Route to the named vehicle, or to every vehicle |
//! | `get_vehicle_list` | Reply with the roster to the requester |
//! | `execution_started` | Broadcast verbatim |
//! | `execution_finished`, `execution_error`, `sensor_update` | Broadcast tagged with the sender's vehicle ID |
//! | `status_update` | Broadcast as `vehicle_status` |
//! | `camera_snapshot_response` | Deliver to the sender's pending request |
//!
//! Telemetry is always re-tagged with the vehicle ID the pool knows for the
//! sending connection; a vehicle-claimed `vehicle_id` is never forwarded.
//! Routing failures for commands are reported back to the sending
//! connection as `error` envelopes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identifiers::DeviceId;
use crate::protocol::{
    Envelope, encode_error, encode_vehicle_list, error_code, message_type, vehicle_status,
};
use crate::transport::{Connection, ConnectionPool};

// ============================================================================
// MessageRouter
// ============================================================================

/// Dispatches inbound envelopes to vehicles, clients or pending requests.
#[derive(Clone)]
pub struct MessageRouter {
    pool: Arc<ConnectionPool>,
}

impl MessageRouter {
    /// Creates a router over `pool`.
    #[inline]
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Returns the pool this router dispatches into.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Routes one envelope received on `source`.
    ///
    /// Unknown types are logged and ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::BroadcastFailed`](crate::Error::BroadcastFailed) if a telemetry broadcast missed clients
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if a reply to `source` could not be sent
    /// - [`Error::Json`](crate::Error::Json) if re-encoding fails
    pub fn route(&self, envelope: Envelope, source: &Arc<Connection>) -> Result<()> {
        match envelope.message_type.as_str() {
            message_type::EXECUTE_CODE | message_type::STOP_EXECUTION => {
                self.forward_command(&envelope, source)
            }

            message_type::EMERGENCY_STOP => match envelope.device_id {
                Some(_) => self.forward_command(&envelope, source),
                None => {
                    self.emergency_stop_all();
                    Ok(())
                }
            },

            message_type::GET_VEHICLE_LIST => {
                let roster = encode_vehicle_list(&self.pool.snapshot_roster())?;
                source.send(roster)
            }

            message_type::EXECUTION_STARTED => self.pool.broadcast_to_clients(&envelope.encode()?),

            message_type::EXECUTION_FINISHED
            | message_type::EXECUTION_ERROR
            | message_type::SENSOR_UPDATE => self.forward_telemetry(envelope, source),

            message_type::STATUS_UPDATE => {
                let Some(device_id) = sender_identity(&envelope, source) else {
                    return Ok(());
                };
                let status = vehicle_status(device_id, envelope.get_bool("busy"));
                self.pool.broadcast_to_clients(&status.encode()?)
            }

            message_type::CAMERA_SNAPSHOT_RESPONSE => {
                Self::deliver_response(&envelope, source);
                Ok(())
            }

            other => {
                warn!(conn_id = %source.id(), message_type = other, "Unrecognized message type");
                Ok(())
            }
        }
    }
}

// ============================================================================
// MessageRouter - Commands
// ============================================================================

impl MessageRouter {
    /// Routes a client command to the vehicle named in the envelope.
    fn forward_command(&self, envelope: &Envelope, source: &Connection) -> Result<()> {
        let Some(device_id) = envelope.device_id.as_ref() else {
            warn!(
                conn_id = %source.id(),
                message_type = %envelope.message_type,
                "Command without vehicle_id"
            );
            return reply_error(source, error_code::MISSING_VEHICLE_ID, "vehicle_id is required");
        };

        let frame = envelope.encode()?;

        if let Err(e) = self.pool.route_to_device(device_id, frame) {
            warn!(
                error = %e,
                vehicle_id = %device_id,
                message_type = %envelope.message_type,
                "Failed to route command"
            );
            return reply_error(
                source,
                error_code::VEHICLE_OFFLINE,
                &format!("vehicle {device_id} is not connected"),
            );
        }

        info!(
            vehicle_id = %device_id,
            message_type = %envelope.message_type,
            "Command routed to vehicle"
        );
        Ok(())
    }

    /// Sends a fresh `emergency_stop` to every online vehicle.
    ///
    /// Best-effort: failures are logged per vehicle.
    fn emergency_stop_all(&self) {
        let roster = self.pool.snapshot_roster();

        for entry in roster.iter().filter(|entry| entry.online) {
            let frame = match Envelope::new(message_type::EMERGENCY_STOP)
                .with_device(entry.device_id.clone())
                .encode()
            {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, vehicle_id = %entry.device_id, "Failed to encode emergency stop");
                    continue;
                }
            };

            if let Err(e) = self.pool.route_to_device(&entry.device_id, frame) {
                warn!(error = %e, vehicle_id = %entry.device_id, "Emergency stop not delivered");
            }
        }

        warn!(vehicles = roster.len(), "Emergency stop sent to all vehicles");
    }
}

// ============================================================================
// MessageRouter - Telemetry
// ============================================================================

impl MessageRouter {
    /// Broadcasts vehicle telemetry re-tagged with the sender's identity.
    fn forward_telemetry(&self, envelope: Envelope, source: &Connection) -> Result<()> {
        let Some(device_id) = sender_identity(&envelope, source) else {
            return Ok(());
        };

        let tagged = Envelope::new(envelope.message_type)
            .with_device(device_id)
            .with_data(envelope.data);

        self.pool.broadcast_to_clients(&tagged.encode()?)
    }

    /// Hands a proxied response to the sender's pending-request table.
    fn deliver_response(envelope: &Envelope, source: &Connection) {
        let Some(request_id) = envelope.request_id() else {
            warn!(conn_id = %source.id(), "camera_snapshot_response without request_id");
            return;
        };

        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, %request_id, "Failed to encode camera response");
                return;
            }
        };

        let delivered = source.deliver_response(&request_id, payload);
        debug!(%request_id, delivered, "Camera response received");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns the pool-known identity of a telemetry sender.
///
/// Telemetry from a connection that never registered as a vehicle is
/// dropped.
fn sender_identity(envelope: &Envelope, source: &Connection) -> Option<DeviceId> {
    let device_id = source.device_id().cloned();
    if device_id.is_none() {
        warn!(
            conn_id = %source.id(),
            message_type = %envelope.message_type,
            "Dropping vehicle message from unregistered connection"
        );
    }
    device_id
}

/// Sends an `error` envelope back to the originating connection.
fn reply_error(source: &Connection, code: &str, message: &str) -> Result<()> {
    source.send(encode_error(code, message)?)
}

// ============================================================================
// Tests
// ============================================================================
