//! WebSocket protocol message types.
//!
//! This module defines the JSON envelope exchanged with vehicles and
//! front-end clients, plus the gateway-originated messages.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `execute_code`, `stop_execution`, `emergency_stop` | Client → Vehicle | Commands |
//! | `get_vehicle_list` | Client → Gateway | Roster query |
//! | `execution_*`, `sensor_update`, `status_update` | Vehicle → Clients | Telemetry |
//! | `camera_snapshot_request` / `_response` | Gateway ↔ Vehicle | Proxied request |
//! | `heartbeat` / `pong` | Vehicle ↔ Gateway | Liveness |
//! | `vehicle_list`, `vehicle_status`, `error` | Gateway → Clients | Notifications |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope codec and gateway message encoders |
//! | `types` | Type tags, error codes, roster records |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope message type and codec.
pub mod envelope;

/// Type tags, error codes and roster records.
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{
    Envelope, decode_vehicle_list, encode_error, encode_pong, encode_vehicle_list,
    vehicle_status,
};
pub use types::{ConnectionKind, RosterEntry, error_code, message_type};
