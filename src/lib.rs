//! Vehicle Gateway - real-time bridge between vehicles and front-end clients.
//!
//! This library implements a WebSocket gateway that embedded vehicles and
//! browser clients both connect to. It keeps a live roster of vehicles,
//! routes commands to them, fans telemetry out to clients, evicts silent
//! vehicles and proxies camera snapshots over an HTTP API.
//!
//! # Architecture
//!
//! The gateway is a hub between two kinds of peers:
//!
//! - **Vehicles**: identified by the `X-Vehicle-ID` upgrade header or a
//!   `register` message, send heartbeats and telemetry, receive commands
//! - **Clients**: anonymous, send commands, receive telemetry and roster updates
//!
//! Key design principles:
//!
//! - At most one live connection per vehicle ID; the pool is the single owner
//! - Every frame is one JSON [`Envelope`] with a `type` tag
//! - Roster changes are pushed to clients, never polled
//! - HTTP requests to a vehicle are correlated by `request_id` and time out
//!   into a placeholder image
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use vehicle_gateway::{ConnectionPool, GatewayServer, MessageRouter, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pool = Arc::new(ConnectionPool::new(
//!         Duration::from_secs(30),
//!         Duration::from_secs(60),
//!     ));
//!     let monitor = pool.start_liveness_monitor();
//!
//!     let router = MessageRouter::new(Arc::clone(&pool));
//!     let addr = SocketAddr::from(([127, 0, 0, 1], 5001));
//!     let server = GatewayServer::bind(addr, "/ws/gateway", router).await?;
//!     println!("Gateway at {}", server.ws_url());
//!
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     pool.stop();
//!     let _ = monitor.await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | HTTP API: health, vehicle list, camera snapshot |
//! | [`bridge`] | Camera snapshot request/response bridge |
//! | [`config`] | TOML configuration and CLI overrides |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection, vehicle and request IDs |
//! | [`protocol`] | Envelope codec and message types |
//! | [`router`] | Message dispatch by type |
//! | [`session`] | Per-connection read loop |
//! | [`transport`] | Connections, pool, liveness and WebSocket server |

// ============================================================================
// Modules
// ============================================================================

/// HTTP API server.
pub mod api;

/// Camera snapshot bridge.
///
/// Turns an HTTP request into a correlated vehicle request with a timeout.
pub mod bridge;

/// Configuration file and command-line arguments.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing connection, vehicle and request IDs.
pub mod identifiers;

/// WebSocket protocol message types.
pub mod protocol;

/// Message routing.
pub mod router;

/// Per-connection session loop.
pub mod session;

/// WebSocket transport layer.
///
/// Connection registry, liveness monitor and WebSocket server.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{CameraBridge, CameraFrame, PLACEHOLDER_JPEG};

// Configuration types
pub use config::{Args, GatewayConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, DeviceId, RequestId};

// Protocol types
pub use protocol::{Envelope, RosterEntry};

// Routing types
pub use router::MessageRouter;
pub use session::Session;

// Transport types
pub use transport::{Connection, ConnectionPool, GatewayServer};
