//! Type-safe identifiers for gateway entities.
//!
//! Newtype wrappers keep connection IDs, vehicle IDs and request IDs from
//! being mixed up at compile time.
//!
//! | Type | Source | Format |
//! |------|--------|--------|
//! | [`ConnectionId`] | Process-wide counter | `conn_<n>` |
//! | [`DeviceId`] | Vehicle (header or `register`) | opaque string |
//! | [`RequestId`] | Gateway, echoed by vehicle | `<prefix>_<uuid>` |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ConnectionId
// ============================================================================

/// Counter backing [`ConnectionId::next`].
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier assigned to every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

// ============================================================================
// DeviceId
// ============================================================================

/// Vehicle identifier supplied by the vehicle itself.
///
/// Serialized transparently as the wire `vehicle_id` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a vehicle ID.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses an optional wire value, treating empty strings as absent.
    #[inline]
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        let trimmed = id.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Correlation key for a proxied request and its asynchronous response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps a request ID received from the wire.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh request ID tagged with `prefix` (e.g. `cam_…`).
    #[inline]
    #[must_use]
    pub fn generate_with_prefix(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert!(a.to_string().starts_with("conn_"));
    }

    #[test]
    fn test_device_id_parse() {
        assert_eq!(DeviceId::parse("v1"), Some(DeviceId::new("v1")));
        assert_eq!(DeviceId::parse(" v1 "), Some(DeviceId::new("v1")));
        assert_eq!(DeviceId::parse(""), None);
        assert_eq!(DeviceId::parse("   "), None);
    }

    #[test]
    fn test_device_id_serde_transparent() {
        let id = DeviceId::new("vehicle-001");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"vehicle-001\"");
    }

    #[test]
    fn test_request_id_prefix() {
        let id = RequestId::generate_with_prefix("cam");
        assert!(id.as_str().starts_with("cam_"));
        assert_ne!(id, RequestId::generate_with_prefix("cam"));
    }
}
