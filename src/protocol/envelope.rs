//! Envelope message type and JSON codec.
//!
//! Every frame exchanged with vehicles and clients is a JSON text frame
//! holding one [`Envelope`].

// ============================================================================
// Imports
// ============================================================================

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, RequestId};

use super::types::{RosterEntry, message_type};

// ============================================================================
// Envelope
// ============================================================================

/// A typed message between the gateway and a vehicle or client.
///
/// # Format
///
/// ```json
/// {
///   "type": "execute_code",
///   "vehicle_id": "vehicle-001",
///   "data": { "code": "..." },
///   "timestamp": 1700000000
/// }
/// ```
///
/// `vehicle_id`, `data` and `timestamp` are optional on the wire. A missing
/// or `null` `data` decodes to an empty map, and an empty `vehicle_id`
/// decodes to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Addressed or originating vehicle.
    #[serde(
        rename = "vehicle_id",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub device_id: Option<DeviceId>,

    /// Type-specific payload.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Map::is_empty"
    )]
    pub data: Map<String, Value>,

    /// Epoch seconds, `0` when absent.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,
}

impl Envelope {
    /// Creates an envelope stamped with the current time and an empty payload.
    #[inline]
    #[must_use]
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            device_id: None,
            data: Map::new(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Sets the vehicle ID.
    #[inline]
    #[must_use]
    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Replaces the payload.
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Inserts one payload field.
    #[inline]
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Decodes an envelope from a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame is not a JSON object with a
    /// string `type`.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes the envelope as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Gets a string payload field.
    ///
    /// Returns `None` if the key is missing or not a string.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Gets a boolean payload field.
    ///
    /// Returns `false` if the key is missing or not a boolean.
    #[inline]
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.data
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }

    /// Extracts the non-empty `request_id` payload field.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.get_str("request_id")
            .filter(|id| !id.is_empty())
            .map(RequestId::new)
    }
}

// ============================================================================
// Gateway Messages
// ============================================================================

/// Payload of a `vehicle_list` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VehicleListData {
    vehicles: Vec<RosterEntry>,
}

/// Full `vehicle_list` message.
#[derive(Debug, Serialize, Deserialize)]
struct VehicleListMessage {
    #[serde(rename = "type")]
    message_type: String,
    data: VehicleListData,
}

/// Payload of an `error` message.
#[derive(Debug, Serialize)]
struct ErrorData<'a> {
    code: &'a str,
    message: &'a str,
}

/// Full `error` message.
#[derive(Debug, Serialize)]
struct ErrorMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    data: ErrorData<'a>,
}

/// Encodes a roster broadcast.
///
/// Format: `{"type":"vehicle_list","data":{"vehicles":[...]}}`
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_vehicle_list(vehicles: &[RosterEntry]) -> Result<String> {
    let message = VehicleListMessage {
        message_type: message_type::VEHICLE_LIST.to_string(),
        data: VehicleListData {
            vehicles: vehicles.to_vec(),
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Decodes a roster broadcast.
///
/// # Errors
///
/// - [`Error::Json`] if the frame is malformed
/// - [`Error::Protocol`] if the frame is not a `vehicle_list`
pub fn decode_vehicle_list(text: &str) -> Result<Vec<RosterEntry>> {
    let message: VehicleListMessage = serde_json::from_str(text)?;
    if message.message_type != message_type::VEHICLE_LIST {
        return Err(Error::protocol(format!(
            "expected {}, got {}",
            message_type::VEHICLE_LIST,
            message.message_type
        )));
    }
    Ok(message.data.vehicles)
}

/// Encodes an error report.
///
/// Format: `{"type":"error","data":{"code":"...","message":"..."}}`
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_error(code: &str, message: &str) -> Result<String> {
    let message = ErrorMessage {
        message_type: message_type::ERROR,
        data: ErrorData { code, message },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Encodes a liveness acknowledgement: `{"type":"pong"}`.
#[inline]
#[must_use]
pub fn encode_pong() -> String {
    format!(r#"{{"type":"{}"}}"#, message_type::PONG)
}

/// Builds the `vehicle_status` broadcast for a `status_update`.
#[inline]
#[must_use]
pub fn vehicle_status(device_id: DeviceId, busy: bool) -> Envelope {
    Envelope::new(message_type::VEHICLE_STATUS)
        .with_device(device_id)
        .with_field("online", true)
        .with_field("busy", busy)
}

// ============================================================================
// Serde Helpers
// ============================================================================

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<DeviceId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(DeviceId::parse))
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default())
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_envelope() {
        let text = r#"{
            "type": "execute_code",
            "vehicle_id": "vehicle-001",
            "data": {"code": "forward(1)", "timeout": 30},
            "timestamp": 1700000000
        }"#;

        let envelope = Envelope::decode(text).expect("decode");
        assert_eq!(envelope.message_type, "execute_code");
        assert_eq!(envelope.device_id, Some(DeviceId::new("vehicle-001")));
        assert_eq!(envelope.get_str("code"), Some("forward(1)"));
        assert_eq!(envelope.data["timeout"], json!(30));
        assert_eq!(envelope.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_decode_defaults_missing_fields() {
        let envelope = Envelope::decode(r#"{"type":"get_vehicle_list"}"#).expect("decode");
        assert!(envelope.device_id.is_none());
        assert!(envelope.data.is_empty());
        assert_eq!(envelope.timestamp, 0);
    }

    #[test]
    fn test_decode_null_data_and_empty_vehicle() {
        let envelope =
            Envelope::decode(r#"{"type":"execute_code","vehicle_id":"","data":null}"#)
                .expect("decode");
        assert!(envelope.device_id.is_none());
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        assert!(Envelope::decode(r#"{"vehicle_id":"v1"}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn test_encode_omits_empty_fields() {
        let mut envelope = Envelope::new("execution_started");
        envelope.timestamp = 0;
        assert_eq!(
            envelope.encode().expect("encode"),
            r#"{"type":"execution_started"}"#
        );
    }

    #[test]
    fn test_payload_helpers() {
        let envelope = Envelope::new("status_update")
            .with_field("busy", "yes")
            .with_field("request_id", "");

        assert!(!envelope.get_bool("busy"));
        assert!(!envelope.get_bool("missing"));
        assert!(envelope.request_id().is_none());

        let envelope = envelope.with_field("busy", true).with_field("request_id", "cam_1");
        assert!(envelope.get_bool("busy"));
        assert_eq!(envelope.request_id(), Some(RequestId::new("cam_1")));
    }

    #[test]
    fn test_vehicle_list_round_trip() {
        let roster = vec![RosterEntry::online(DeviceId::new("v1"))];
        let text = encode_vehicle_list(&roster).expect("encode");

        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["type"], "vehicle_list");
        assert_eq!(value["data"]["vehicles"][0]["vehicle_id"], "v1");

        let decoded = decode_vehicle_list(&text).expect("decode");
        assert_eq!(decoded, roster);
    }

    #[test]
    fn test_empty_vehicle_list_keeps_array() {
        let text = encode_vehicle_list(&[]).expect("encode");
        assert_eq!(text, r#"{"type":"vehicle_list","data":{"vehicles":[]}}"#);
    }

    #[test]
    fn test_decode_vehicle_list_rejects_other_types() {
        let text = r#"{"type":"pong","data":{"vehicles":[]}}"#;
        assert!(matches!(
            decode_vehicle_list(text),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_encode_error() {
        let text = encode_error("MISSING_VEHICLE_ID", "vehicle_id is required").expect("encode");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(
            value,
            json!({
                "type": "error",
                "data": {"code": "MISSING_VEHICLE_ID", "message": "vehicle_id is required"}
            })
        );
    }

    #[test]
    fn test_encode_pong() {
        let value: Value = serde_json::from_str(&encode_pong()).expect("json");
        assert_eq!(value, json!({"type": "pong"}));
    }

    #[test]
    fn test_vehicle_status() {
        let envelope = vehicle_status(DeviceId::new("v1"), true);
        assert_eq!(envelope.message_type, "vehicle_status");
        assert_eq!(envelope.device_id, Some(DeviceId::new("v1")));
        assert_eq!(envelope.data["online"], json!(true));
        assert_eq!(envelope.data["busy"], json!(true));
    }
}
