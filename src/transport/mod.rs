//! WebSocket transport layer.
//!
//! This module owns every live connection and the machinery around them:
//! the registry, the liveness monitor, request correlation and the
//! WebSocket server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐                                   ┌──────────────┐
//! │  Vehicles    │  X-Vehicle-ID     ┌────────────┐  │  Front-end   │
//! │  (WebSocket) │◄────────────────► │ Gateway    │◄►│  clients     │
//! └──────────────┘                   │  Server    │  └──────────────┘
//!                                    │    │       │
//!                                    │    ▼       │
//!                                    │ Connection │
//!                                    │   Pool     │◄── Liveness monitor
//!                                    └────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `GatewayServer` accepts and upgrades the socket, classifying it
//! 2. `ConnectionPool::add` registers it (vehicles keyed by vehicle ID)
//! 3. The session read loop routes inbound frames; `register` may promote a client
//! 4. Peer close, transport error or liveness eviction ends the session
//! 5. `ConnectionPool::remove` + `Connection::close` release it
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | One peer: send path, liveness, pending requests |
//! | `liveness` | Periodic eviction of silent vehicles |
//! | `pending` | Request/response correlation table |
//! | `pool` | Registry of vehicles and clients |
//! | `server` | WebSocket accept loop and handshake |

// ============================================================================
// Submodules
// ============================================================================

/// Gateway-side view of one WebSocket peer.
pub mod connection;

/// Periodic eviction of silent vehicles.
pub mod liveness;

/// Request/response correlation.
pub mod pending;

/// Connection registry.
pub mod pool;

/// WebSocket server for vehicles and clients.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, Outbound, OutboundReceiver};
pub use pending::{PendingRequests, PendingResponse};
pub use pool::{ConnectionPool, PoolStats, RosterHandler};
pub use server::{GatewayServer, HANDSHAKE_TIMEOUT, VEHICLE_ID_HEADER};
