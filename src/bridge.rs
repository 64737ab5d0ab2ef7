//! Proxied camera snapshots.
//!
//! Turns one synchronous snapshot call into a `camera_snapshot_request`
//! sent to a vehicle and a bounded wait for the correlated
//! `camera_snapshot_response`.
//!
//! ```text
//! snapshot(v1) ─► begin_request(cam_…) ─► send request ─► await_response(timeout)
//!                                                              │
//!     vehicle ─► camera_snapshot_response ─► router ─► deliver_response(cam_…)
//! ```
//!
//! A timeout or an unusable response is not an error: the caller receives
//! [`PLACEHOLDER_JPEG`] instead. Only an unreachable vehicle fails the call.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, RequestId};
use crate::protocol::{Envelope, message_type};
use crate::transport::ConnectionPool;

// ============================================================================
// Constants
// ============================================================================

/// Minimal 1x1 JPEG served when no real frame is available.
pub const PLACEHOLDER_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x03, 0x02, 0x02, 0x03, 0x02, 0x02,
    0x03, 0x03, 0x03, 0x03, 0x04, 0x03, 0x03, 0x04, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05,
    0x05, 0x07, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0xFF,
    0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xC4, 0x00,
    0x01, 0x00, 0x00, 0x01, 0x05, 0x01, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0xFF, 0xDA,
    0x00, 0x03, 0x01, 0x02, 0x03, 0x00, 0x02, 0x03, 0xFF, 0xD9,
];

/// Prefix of snapshot request IDs.
const REQUEST_PREFIX: &str = "cam";

// ============================================================================
// CameraFrame
// ============================================================================

/// Why a placeholder was served instead of a real frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderReason {
    /// No response within the timeout, or the connection closed while waiting.
    Timeout,
    /// The response was not a valid envelope.
    InvalidResponse,
    /// `data.image` was not valid base64.
    InvalidImage,
    /// `data.image` was missing or empty.
    EmptyImage,
}

/// JPEG bytes returned by [`CameraBridge::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    bytes: Vec<u8>,
    placeholder: Option<PlaceholderReason>,
}

impl CameraFrame {
    /// Wraps a frame decoded from the vehicle.
    fn captured(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            placeholder: None,
        }
    }

    /// Builds the placeholder frame.
    #[must_use]
    pub fn placeholder(reason: PlaceholderReason) -> Self {
        Self {
            bytes: PLACEHOLDER_JPEG.to_vec(),
            placeholder: Some(reason),
        }
    }

    /// Returns the JPEG bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame, returning the JPEG bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns why the placeholder was served, if it was.
    #[inline]
    #[must_use]
    pub fn placeholder_reason(&self) -> Option<PlaceholderReason> {
        self.placeholder
    }

    /// Returns `true` if this is the placeholder frame.
    #[inline]
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }
}

// ============================================================================
// CameraBridge
// ============================================================================

/// Request/response bridge for vehicle camera snapshots.
#[derive(Clone)]
pub struct CameraBridge {
    pool: Arc<ConnectionPool>,
    timeout: Duration,
}

impl CameraBridge {
    /// Creates a bridge waiting up to `timeout` for each response.
    #[inline]
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Returns the response timeout.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Requests one camera frame from `device_id`.
    ///
    /// The pool lock is only held for the lookup, never while waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceOffline`] if the vehicle is not connected
    /// - [`Error::ConnectionClosed`] if the request could not be sent
    pub async fn snapshot(&self, device_id: &DeviceId) -> Result<CameraFrame> {
        let connection = self
            .pool
            .device(device_id)
            .filter(|connection| !connection.is_closed())
            .ok_or_else(|| Error::device_offline(device_id.clone()))?;

        let request_id = RequestId::generate_with_prefix(REQUEST_PREFIX);
        let frame = Envelope::new(message_type::CAMERA_SNAPSHOT_REQUEST)
            .with_field("request_id", request_id.as_str())
            .encode()?;

        let pending = connection.begin_request(request_id.clone());

        if let Err(e) = connection.send(frame) {
            connection.abandon_request(pending);
            return Err(e);
        }

        info!(vehicle_id = %device_id, %request_id, "Camera snapshot requested");

        let Some(payload) = connection.await_response(pending, self.timeout).await else {
            warn!(
                vehicle_id = %device_id,
                %request_id,
                timeout_ms = self.timeout.as_millis() as u64,
                "Camera snapshot timed out"
            );
            return Ok(CameraFrame::placeholder(PlaceholderReason::Timeout));
        };

        let frame = decode_frame(&payload);
        match frame.placeholder_reason() {
            None => info!(%request_id, size = frame.bytes().len(), "Camera snapshot received"),
            Some(reason) => warn!(%request_id, ?reason, "Unusable camera snapshot"),
        }

        Ok(frame)
    }
}

/// Extracts the JPEG from a `camera_snapshot_response` envelope.
fn decode_frame(payload: &str) -> CameraFrame {
    let Ok(envelope) = Envelope::decode(payload) else {
        return CameraFrame::placeholder(PlaceholderReason::InvalidResponse);
    };

    let image = envelope.get_str("image").unwrap_or_default();

    match STANDARD.decode(image) {
        Ok(bytes) if bytes.is_empty() => CameraFrame::placeholder(PlaceholderReason::EmptyImage),
        Ok(bytes) => CameraFrame::captured(bytes),
        Err(_) => CameraFrame::placeholder(PlaceholderReason::InvalidImage),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{Connection, Outbound, OutboundReceiver};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<ConnectionPool>, CameraBridge) {
        let pool = Arc::new(ConnectionPool::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        ));
        let bridge = CameraBridge::new(Arc::clone(&pool), TIMEOUT);
        (pool, bridge)
    }

    fn vehicle(pool: &ConnectionPool, id: &str) -> (Arc<Connection>, OutboundReceiver) {
        let (conn, rx) = Connection::new(Some(DeviceId::new(id)));
        pool.add(Arc::clone(&conn)).expect("add");
        (conn, rx)
    }

    /// Answers the next snapshot request on `rx` with `image`.
    async fn answer(conn: Arc<Connection>, mut rx: OutboundReceiver, image: &'static str) {
        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected request frame");
        };
        let request = Envelope::decode(&text).expect("decode");
        assert_eq!(request.message_type, "camera_snapshot_request");
        let request_id = request.request_id().expect("request_id");
        assert!(request_id.as_str().starts_with("cam_"));

        let response = Envelope::new("camera_snapshot_response")
            .with_field("request_id", request_id.as_str())
            .with_field("image", image)
            .encode()
            .expect("encode");
        conn.deliver_response(&request_id, response);
    }

    #[test]
    fn test_placeholder_is_jpeg() {
        assert_eq!(&PLACEHOLDER_JPEG[..2], &[0xFF, 0xD8]);
        assert_eq!(&PLACEHOLDER_JPEG[PLACEHOLDER_JPEG.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_decode_frame() {
        let ok = r#"{"type":"camera_snapshot_response","data":{"image":"/9j/"}}"#;
        let frame = decode_frame(ok);
        assert!(!frame.is_placeholder());
        assert_eq!(frame.bytes(), &[0xFF, 0xD8, 0xFF]);

        let cases = [
            ("garbage", PlaceholderReason::InvalidResponse),
            (r#"{"type":"camera_snapshot_response","data":{"image":"!!"}}"#, PlaceholderReason::InvalidImage),
            (r#"{"type":"camera_snapshot_response","data":{"image":""}}"#, PlaceholderReason::EmptyImage),
            (r#"{"type":"camera_snapshot_response"}"#, PlaceholderReason::EmptyImage),
        ];
        for (payload, reason) in cases {
            let frame = decode_frame(payload);
            assert_eq!(frame.placeholder_reason(), Some(reason), "{payload}");
            assert_eq!(frame.bytes(), PLACEHOLDER_JPEG);
        }
    }

    #[tokio::test]
    async fn test_snapshot_offline_vehicle() {
        let (_pool, bridge) = setup();
        let err = bridge.snapshot(&DeviceId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::DeviceOffline { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_closed_vehicle() {
        let (pool, bridge) = setup();
        let (conn, _rx) = vehicle(&pool, "v1");
        conn.close();

        let err = bridge.snapshot(&DeviceId::new("v1")).await.unwrap_err();
        assert!(err.is_offline());
    }

    #[tokio::test]
    async fn test_snapshot_send_failure() {
        let (pool, bridge) = setup();
        let (conn, rx) = vehicle(&pool, "v1");
        drop(rx);

        let err = bridge.snapshot(&DeviceId::new("v1")).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed { .. }));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let (pool, bridge) = setup();
        let (conn, rx) = vehicle(&pool, "v1");
        let responder = tokio::spawn(answer(Arc::clone(&conn), rx, "/9j/4A=="));

        let frame = bridge.snapshot(&DeviceId::new("v1")).await.expect("snapshot");
        responder.await.expect("join");

        assert!(!frame.is_placeholder());
        assert_eq!(frame.into_bytes(), vec![0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout_serves_placeholder() {
        let (pool, bridge) = setup();
        let (conn, mut rx) = vehicle(&pool, "v1");

        let frame = bridge.snapshot(&DeviceId::new("v1")).await.expect("snapshot");
        assert_eq!(frame.placeholder_reason(), Some(PlaceholderReason::Timeout));
        assert_eq!(frame.bytes(), PLACEHOLDER_JPEG);

        // A late answer is discarded.
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected request frame");
        };
        let request_id = Envelope::decode(&text)
            .expect("decode")
            .request_id()
            .expect("request_id");
        assert!(!conn.deliver_response(&request_id, "{}".into()));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_snapshots_release_slots() {
        let (pool, bridge) = setup();
        let (conn, _rx) = vehicle(&pool, "v1");

        for _ in 0..3 {
            let cancelled = tokio::time::timeout(
                Duration::from_millis(10),
                bridge.snapshot(&DeviceId::new("v1")),
            )
            .await;
            assert!(cancelled.is_err());
        }

        assert_eq!(conn.pending_count(), 0);
    }
}
