//! HTTP API.
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /health` | Gateway status and pool counters |
//! | `GET /api/vehicles` | Online vehicles |
//! | `GET /api/camera/snapshot?vehicle_id=` | JPEG from the vehicle, or the placeholder |
//!
//! Every other path answers `404` with a JSON error body. CORS is open.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::bridge::{CameraBridge, CameraFrame};
use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::protocol::RosterEntry;
use crate::transport::{ConnectionPool, PoolStats};

// ============================================================================
// State
// ============================================================================

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pool: Arc<ConnectionPool>,
    camera: CameraBridge,
    default_vehicle_id: DeviceId,
}

impl ApiState {
    /// Creates the handler state.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, camera: CameraBridge, default_vehicle_id: DeviceId) -> Self {
        Self {
            pool,
            camera,
            default_vehicle_id,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    vehicles_online: usize,
    stats: PoolStats,
}

#[derive(Debug, Serialize)]
struct VehicleListResponse {
    success: bool,
    data: VehicleListData,
}

#[derive(Debug, Serialize)]
struct VehicleListData {
    vehicles: Vec<RosterEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    vehicle_id: Option<String>,
}

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::DeviceOffline { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::ConnectionClosed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Builds the HTTP router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/vehicles", get(list_vehicles))
        .route("/api/camera/snapshot", get(camera_snapshot))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the HTTP API on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`Error::Io`] if binding or serving fails.
pub async fn serve<F>(addr: SocketAddr, state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let stats = state.pool.stats();

    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        vehicles_online: stats.vehicle_count,
        stats,
    })
}

async fn list_vehicles(State(state): State<ApiState>) -> Json<VehicleListResponse> {
    Json(VehicleListResponse {
        success: true,
        data: VehicleListData {
            vehicles: state.pool.snapshot_roster(),
        },
    })
}

async fn camera_snapshot(
    State(state): State<ApiState>,
    Query(query): Query<SnapshotQuery>,
) -> std::result::Result<Response, ApiError> {
    let device_id = query
        .vehicle_id
        .as_deref()
        .and_then(DeviceId::parse)
        .unwrap_or_else(|| state.default_vehicle_id.clone());

    let frame = state.camera.snapshot(&device_id).await.map_err(|e| {
        warn!(vehicle_id = %device_id, error = %e, "Camera snapshot failed");
        ApiError::from(e)
    })?;

    Ok(jpeg(frame))
}

async fn not_found() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "resource not found".to_string(),
    }
}

fn jpeg(frame: CameraFrame) -> Response {
    ([(header::CONTENT_TYPE, "image/jpeg")], frame.into_bytes()).into_response()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::bridge::PLACEHOLDER_JPEG;
    use crate::protocol::Envelope;
    use crate::transport::{Connection, Outbound};

    fn setup() -> (Arc<ConnectionPool>, Router) {
        let pool = Arc::new(ConnectionPool::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        ));
        let camera = CameraBridge::new(Arc::clone(&pool), Duration::from_secs(5));
        let state = ApiState::new(Arc::clone(&pool), camera, DeviceId::new("vehicle-001"));
        (pool, router(state))
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body")
            .to_vec();
        (status, content_type, body)
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json")
    }

    #[tokio::test]
    async fn test_health() {
        let (pool, app) = setup();
        let (vehicle, _rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(vehicle).expect("add");

        let (status, _, body) = fetch(app, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let body = json(&body);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["vehicles_online"], 1);
        assert_eq!(body["stats"]["total_count"], 1);
        assert_eq!(body["stats"]["timeout_secs"], 60);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_list_vehicles() {
        let (pool, app) = setup();
        let (vehicle, _rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(vehicle).expect("add");

        let (status, _, body) = fetch(app, "/api/vehicles").await;
        assert_eq!(status, StatusCode::OK);

        let body = json(&body);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["vehicles"][0]["vehicle_id"], "v1");
        assert_eq!(body["data"]["vehicles"][0]["name"], "v1");
        assert_eq!(body["data"]["vehicles"][0]["online"], true);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (_pool, app) = setup();
        let (status, _, body) = fetch(app, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json(&body)["error"].is_string());
    }

    #[tokio::test]
    async fn test_snapshot_offline_vehicle() {
        let (_pool, app) = setup();
        let (status, _, body) = fetch(app, "/api/camera/snapshot?vehicle_id=ghost").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json(&body)["error"].as_str().expect("error").contains("ghost"));
    }

    #[tokio::test]
    async fn test_snapshot_send_failure() {
        let (pool, app) = setup();
        let (vehicle, rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(vehicle).expect("add");
        drop(rx);

        let (status, _, _) = fetch(app, "/api/camera/snapshot?vehicle_id=v1").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_defaults_vehicle_and_serves_placeholder() {
        let (pool, app) = setup();
        let (vehicle, mut rx) = Connection::new(Some(DeviceId::new("vehicle-001")));
        pool.add(vehicle).expect("add");

        let (status, content_type, body) = fetch(app, "/api/camera/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(body, PLACEHOLDER_JPEG);

        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected request frame");
        };
        let request = Envelope::decode(&text).expect("decode");
        assert_eq!(request.message_type, "camera_snapshot_request");
    }
}
