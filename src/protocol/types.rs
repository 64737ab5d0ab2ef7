//! Message type tags, error codes and roster records.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::DeviceId;

// ============================================================================
// Message Types
// ============================================================================

/// Wire values of the envelope `type` tag.
pub mod message_type {
    /// Vehicle liveness signal.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Liveness acknowledgement sent back to a vehicle.
    pub const PONG: &str = "pong";
    /// Late vehicle registration (`data.vehicle_id`).
    pub const REGISTER: &str = "register";
    /// Front-end client registration (`data.client_id`).
    pub const CLIENT_REGISTER: &str = "client_register";

    /// Run a program on one vehicle.
    pub const EXECUTE_CODE: &str = "execute_code";
    /// Stop the running program on one vehicle.
    pub const STOP_EXECUTION: &str = "stop_execution";
    /// Halt one vehicle, or every online vehicle when unaddressed.
    pub const EMERGENCY_STOP: &str = "emergency_stop";
    /// Roster query from a client.
    pub const GET_VEHICLE_LIST: &str = "get_vehicle_list";

    /// Vehicle started executing.
    pub const EXECUTION_STARTED: &str = "execution_started";
    /// Vehicle finished executing.
    pub const EXECUTION_FINISHED: &str = "execution_finished";
    /// Vehicle execution failed.
    pub const EXECUTION_ERROR: &str = "execution_error";
    /// Periodic sensor readings.
    pub const SENSOR_UPDATE: &str = "sensor_update";
    /// Vehicle busy/idle report.
    pub const STATUS_UPDATE: &str = "status_update";
    /// Status report as re-broadcast to clients.
    pub const VEHICLE_STATUS: &str = "vehicle_status";

    /// Camera frame request sent to a vehicle.
    pub const CAMERA_SNAPSHOT_REQUEST: &str = "camera_snapshot_request";
    /// Camera frame answer from a vehicle.
    pub const CAMERA_SNAPSHOT_RESPONSE: &str = "camera_snapshot_response";

    /// Roster broadcast.
    pub const VEHICLE_LIST: &str = "vehicle_list";
    /// Error reported to a message originator.
    pub const ERROR: &str = "error";
}

/// Codes carried in `error` envelopes.
pub mod error_code {
    /// Command addressed no vehicle.
    pub const MISSING_VEHICLE_ID: &str = "MISSING_VEHICLE_ID";
    /// Addressed vehicle is not connected.
    pub const VEHICLE_OFFLINE: &str = "VEHICLE_OFFLINE";
    /// Vehicle ID is already held by another connection.
    pub const DUPLICATE_VEHICLE_ID: &str = "DUPLICATE_VEHICLE_ID";
}

// ============================================================================
// ConnectionKind
// ============================================================================

/// Which population a connection belongs to.
///
/// A connection starts as [`Unknown`](Self::Unknown) or
/// [`Client`](Self::Client) and may be promoted to
/// [`Device`](Self::Device) once; it never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Not yet classified.
    #[default]
    Unknown,
    /// Vehicle connection.
    #[serde(rename = "vehicle")]
    Device,
    /// Front-end client connection.
    Client,
}

impl ConnectionKind {
    /// Returns the lowercase wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Device => "vehicle",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RosterEntry
// ============================================================================

/// One online vehicle as reported to clients.
///
/// Derived from the pool on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Vehicle ID.
    #[serde(rename = "vehicle_id")]
    pub device_id: DeviceId,
    /// Display name.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Always `true` for entries produced by the pool.
    pub online: bool,
}

impl RosterEntry {
    /// Creates an online entry named after the vehicle ID.
    #[inline]
    #[must_use]
    pub fn online(device_id: DeviceId) -> Self {
        Self {
            display_name: device_id.as_str().to_string(),
            device_id,
            online: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
