//! WebSocket server for vehicles and clients.
//!
//! # Connection Flow
//!
//! 1. Accept the TCP connection
//! 2. Upgrade to WebSocket within [`HANDSHAKE_TIMEOUT`]; reject any path other
//!    than the gateway path with 404
//! 3. Classify by the `X-Vehicle-ID` upgrade header (present: vehicle, absent: client)
//! 4. Spawn the writer task draining the connection's outbound channel
//! 5. Add the connection to the pool; a vehicle ID already held by a live
//!    connection is answered with `DUPLICATE_VEHICLE_ID` and closed
//! 6. Run the [`Session`] read loop until the connection ends

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, DeviceId};
use crate::protocol::{encode_error, error_code};
use crate::router::MessageRouter;
use crate::session::Session;

use super::connection::{Connection, Outbound, OutboundReceiver};

// ============================================================================
// Constants
// ============================================================================

/// Upgrade header identifying a vehicle connection.
pub const VEHICLE_ID_HEADER: &str = "X-Vehicle-ID";

/// Time allowed for a peer to complete the WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write half of an accepted WebSocket.
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ============================================================================
// GatewayServer
// ============================================================================

/// Bound WebSocket listener feeding connections into the pool.
///
/// # Example
///
/// ```ignore
/// let router = MessageRouter::new(Arc::clone(&pool));
/// let server = GatewayServer::bind("127.0.0.1:5001".parse()?, "/ws/gateway", router).await?;
/// println!("listening on {}", server.ws_url());
/// server.run(shutdown_signal()).await;
/// ```
pub struct GatewayServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Accepted upgrade path.
    ws_path: Arc<str>,
    /// Dispatcher shared by every session.
    router: MessageRouter,
    /// Upgrade deadline per accepted socket.
    handshake_timeout: Duration,
}

impl GatewayServer {
    /// Binds the listener.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(
        addr: SocketAddr,
        ws_path: impl Into<Arc<str>>,
        router: MessageRouter,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let ws_path = ws_path.into();

        debug!(%local_addr, ws_path = %ws_path, "WebSocket server bound");

        Ok(Self {
            listener,
            local_addr,
            ws_path,
            router,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    /// Sets the upgrade deadline (default [`HANDSHAKE_TIMEOUT`]).
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{addr}{path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.ws_path)
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Established sessions are not cancelled; they end with their peers.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr, path = %self.ws_path, "WebSocket gateway listening");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Accept loop shutting down");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let router = self.router.clone();
                        let ws_path = Arc::clone(&self.ws_path);
                        let handshake_timeout = self.handshake_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, ws_path, router, handshake_timeout).await {
                                warn!(error = %e, %addr, "Connection handling failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                },
            }
        }

        debug!("Accept loop terminated");
    }
}

// ============================================================================
// Connection Handling
// ============================================================================

/// Upgrades, registers and serves one connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ws_path: Arc<str>,
    router: MessageRouter,
    handshake_timeout: Duration,
) -> Result<()> {
    debug!(%addr, "New TCP connection");

    let mut device_id = None;
    let upgrade = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        if request.uri().path() != &*ws_path {
            return Err(not_found());
        }
        device_id = request
            .headers()
            .get(VEHICLE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(DeviceId::parse);
        Ok(response)
    });

    let ws_stream = timeout(handshake_timeout, upgrade)
        .await
        .map_err(|_| Error::handshake_timeout(handshake_timeout.as_millis() as u64))??;

    let (connection, outbound) = Connection::with_remote_addr(device_id, Some(addr));
    let (ws_write, ws_read) = ws_stream.split();
    tokio::spawn(run_writer(ws_write, outbound, connection.id()));

    match router.pool().add(Arc::clone(&connection)) {
        Ok(()) => {}
        Err(e @ Error::DeviceAlreadyConnected { .. }) => {
            warn!(conn_id = %connection.id(), %addr, error = %e, "Rejecting duplicate vehicle connection");
            let frame = encode_error(
                error_code::DUPLICATE_VEHICLE_ID,
                &format!(
                    "vehicle {} is already connected",
                    connection.device_id().map(DeviceId::as_str).unwrap_or_default()
                ),
            )?;
            let _ = connection.send(frame);
            connection.close();
            return Ok(());
        }
        Err(e) => {
            connection.close();
            return Err(e);
        }
    }

    Session::new(connection, router).run(ws_read).await;
    Ok(())
}

/// Drains the outbound channel into the socket.
///
/// Exits on [`Outbound::Close`], a write failure, or when every sender is gone.
async fn run_writer(mut ws_write: WsSink, mut outbound: OutboundReceiver, conn_id: ConnectionId) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                    debug!(%conn_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = ws_write.close().await;
    debug!(%conn_id, "Writer task terminated");
}

/// Handshake rejection for unknown paths.
fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

// ============================================================================
// Tests
// ============================================================================
