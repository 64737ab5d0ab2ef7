//! Error types for the vehicle gateway.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use vehicle_gateway::{Error, Result};
//!
//! fn forward(pool: &ConnectionPool, vehicle: &DeviceId, frame: String) -> Result<()> {
//!     pool.route_to_device(vehicle, frame)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Registry | [`Error::DuplicateConnection`], [`Error::DeviceAlreadyConnected`], [`Error::ConnectionNotFound`] |
//! | Routing | [`Error::DeviceOffline`], [`Error::ConnectionClosed`], [`Error::BroadcastFailed`] |
//! | Protocol | [`Error::Protocol`], [`Error::HandshakeTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{ConnectionId, DeviceId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the gateway configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Connection ID already present in the pool.
    ///
    /// Returned by `ConnectionPool::add`; the caller must reject the connection.
    #[error("Connection already registered: {conn_id}")]
    DuplicateConnection {
        /// The clashing connection ID.
        conn_id: ConnectionId,
    },

    /// Another live connection already holds this vehicle ID.
    #[error("Vehicle already connected: {vehicle_id}")]
    DeviceAlreadyConnected {
        /// The contested vehicle ID.
        vehicle_id: DeviceId,
    },

    /// Connection is not tracked by the pool.
    #[error("Connection not found: {conn_id}")]
    ConnectionNotFound {
        /// The missing connection ID.
        conn_id: ConnectionId,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// Vehicle is not connected, or its connection is closed.
    #[error("Vehicle offline: {vehicle_id}")]
    DeviceOffline {
        /// The unreachable vehicle ID.
        vehicle_id: DeviceId,
    },

    /// Send attempted on a closed connection.
    #[error("Connection closed: {conn_id}")]
    ConnectionClosed {
        /// The closed connection ID.
        conn_id: ConnectionId,
    },

    /// Broadcast reached some clients but not all.
    #[error("Broadcast failed for {failed} of {total} clients")]
    BroadcastFailed {
        /// Number of clients the frame could not be sent to.
        failed: usize,
        /// Number of clients targeted.
        total: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// WebSocket upgrade did not complete in time.
    #[error("WebSocket handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited for the upgrade request.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a duplicate connection error.
    #[inline]
    pub fn duplicate_connection(conn_id: ConnectionId) -> Self {
        Self::DuplicateConnection { conn_id }
    }

    /// Creates a vehicle already connected error.
    #[inline]
    pub fn device_already_connected(vehicle_id: DeviceId) -> Self {
        Self::DeviceAlreadyConnected { vehicle_id }
    }

    /// Creates a connection not found error.
    #[inline]
    pub fn connection_not_found(conn_id: ConnectionId) -> Self {
        Self::ConnectionNotFound { conn_id }
    }

    /// Creates a vehicle offline error.
    #[inline]
    pub fn device_offline(vehicle_id: DeviceId) -> Self {
        Self::DeviceOffline { vehicle_id }
    }

    /// Creates a connection closed error.
    #[inline]
    pub fn connection_closed(conn_id: ConnectionId) -> Self {
        Self::ConnectionClosed { conn_id }
    }

    /// Creates a broadcast failure error.
    #[inline]
    pub fn broadcast_failed(failed: usize, total: usize) -> Self {
        Self::BroadcastFailed { failed, total }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the target vehicle could not be reached.
    #[inline]
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            Self::DeviceOffline { .. } | Self::ConnectionClosed { .. }
        )
    }

    /// Returns `true` if this error is local to one message.
    ///
    /// Recoverable errors are logged and never tear down a connection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceOffline { .. }
                | Self::BroadcastFailed { .. }
                | Self::Protocol { .. }
                | Self::Json(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::device_offline(DeviceId::new("v1"));
        assert_eq!(err.to_string(), "Vehicle offline: v1");
    }

    #[test]
    fn test_broadcast_failed_display() {
        let err = Error::broadcast_failed(2, 5);
        assert_eq!(err.to_string(), "Broadcast failed for 2 of 5 clients");
    }

    #[test]
    fn test_is_offline() {
        let offline = Error::device_offline(DeviceId::new("v1"));
        let closed = Error::connection_closed(ConnectionId::next());
        let other = Error::config("test");

        assert!(offline.is_offline());
        assert!(closed.is_offline());
        assert!(!other.is_offline());
    }

    #[test]
    fn test_handshake_timeout_display() {
        let err = Error::handshake_timeout(10_000);
        assert_eq!(err.to_string(), "WebSocket handshake timed out after 10000ms");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::broadcast_failed(1, 1).is_recoverable());
        assert!(Error::protocol("missing request_id").is_recoverable());
        assert!(!Error::duplicate_connection(ConnectionId::next()).is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
