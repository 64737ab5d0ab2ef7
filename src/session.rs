//! Per-connection read loop.
//!
//! A [`Session`] owns the inbound half of one WebSocket. It handles the
//! session-level messages itself and hands everything else to the
//! [`MessageRouter`].
//!
//! | Type | Handling |
//! |------|----------|
//! | `heartbeat` | Vehicles: refresh liveness and reply `pong` |
//! | `register` | Promote the connection to the vehicle in `data.vehicle_id` |
//! | `client_register` | Logged |
//! | anything else | [`MessageRouter::route`] |
//!
//! The loop ends when the peer closes, the transport fails, or the
//! connection is closed from the gateway side (e.g. by the liveness
//! monitor). The connection is then removed from the pool and closed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::identifiers::DeviceId;
use crate::protocol::{Envelope, encode_error, encode_pong, encode_vehicle_list, error_code, message_type};
use crate::router::MessageRouter;
use crate::transport::Connection;

// ============================================================================
// Session
// ============================================================================

/// Read loop for one registered connection.
pub struct Session {
    connection: Arc<Connection>,
    router: MessageRouter,
}

impl Session {
    /// Creates a session for a connection already added to the router's pool.
    #[inline]
    #[must_use]
    pub fn new(connection: Arc<Connection>, router: MessageRouter) -> Self {
        Self { connection, router }
    }

    /// Runs the read loop until the connection ends.
    ///
    /// Clients first receive the current roster.
    pub async fn run<S>(self, mut inbound: S)
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let conn_id = self.connection.id();

        info!(
            %conn_id,
            kind = %self.connection.kind(),
            vehicle_id = ?self.connection.device_id().map(DeviceId::as_str),
            remote_addr = ?self.connection.remote_addr(),
            "Connection established"
        );

        if !self.connection.is_device() {
            self.push_roster();
        }

        loop {
            tokio::select! {
                _ = self.connection.closed() => {
                    debug!(%conn_id, "Connection closed by gateway");
                    break;
                }

                frame = inbound.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),

                        Some(Ok(Message::Close(_))) => {
                            debug!(%conn_id, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(%conn_id, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(%conn_id, "WebSocket stream ended");
                            break;
                        }

                        // Binary, Ping, Pong
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        self.router.pool().remove(conn_id);
        self.connection.close();

        info!(
            %conn_id,
            vehicle_id = ?self.connection.device_id().map(DeviceId::as_str),
            "Connection terminated"
        );
    }
}

// ============================================================================
// Session - Message Handling
// ============================================================================

impl Session {
    /// Decodes and handles one text frame.
    fn handle_text(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(conn_id = %self.connection.id(), error = %e, "Failed to decode message");
                return;
            }
        };

        match envelope.message_type.as_str() {
            message_type::HEARTBEAT => self.handle_heartbeat(),

            message_type::REGISTER => self.handle_register(&envelope),

            message_type::CLIENT_REGISTER => {
                info!(
                    conn_id = %self.connection.id(),
                    client_id = envelope.get_str("client_id").unwrap_or_default(),
                    "Client registered"
                );
            }

            _ => {
                if let Err(e) = self.router.route(envelope, &self.connection) {
                    log_route_error(&self.connection, &e);
                }
            }
        }
    }

    /// Refreshes a vehicle's liveness and acknowledges with `pong`.
    fn handle_heartbeat(&self) {
        let Some(device_id) = self.connection.device_id() else {
            debug!(conn_id = %self.connection.id(), "Ignoring heartbeat from client");
            return;
        };

        self.router.pool().update_liveness(device_id);

        if let Err(e) = self.connection.send(encode_pong()) {
            debug!(vehicle_id = %device_id, error = %e, "Failed to send pong");
        }
    }

    /// Promotes the connection to the vehicle named in `data.vehicle_id`.
    fn handle_register(&self, envelope: &Envelope) {
        let conn_id = self.connection.id();

        let Some(device_id) = envelope.get_str("vehicle_id").and_then(DeviceId::parse) else {
            warn!(%conn_id, "register without vehicle_id");
            return;
        };

        match self
            .router
            .pool()
            .register_as_device(&self.connection, device_id.clone())
        {
            Ok(true) => {}
            Ok(false) => debug!(%conn_id, vehicle_id = %device_id, "Vehicle already registered"),
            Err(e @ Error::DeviceAlreadyConnected { .. }) => {
                warn!(%conn_id, error = %e, "Rejected duplicate vehicle registration");
                self.reply_error(
                    error_code::DUPLICATE_VEHICLE_ID,
                    &format!("vehicle {device_id} is already connected"),
                );
            }
            Err(e) => warn!(%conn_id, error = %e, "Vehicle registration failed"),
        }
    }

    /// Sends the current roster to this connection.
    fn push_roster(&self) {
        let roster = self.router.pool().snapshot_roster();

        let result = encode_vehicle_list(&roster).and_then(|frame| self.connection.send(frame));
        if let Err(e) = result {
            warn!(conn_id = %self.connection.id(), error = %e, "Failed to send initial roster");
        }
    }

    fn reply_error(&self, code: &str, message: &str) {
        let result = encode_error(code, message).and_then(|frame| self.connection.send(frame));
        if let Err(e) = result {
            debug!(conn_id = %self.connection.id(), error = %e, "Failed to send error reply");
        }
    }
}

fn log_route_error(connection: &Connection, error: &Error) {
    if error.is_recoverable() {
        warn!(conn_id = %connection.id(), error = %error, "Routing failed");
    } else {
        error!(conn_id = %connection.id(), error = %error, "Routing failed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::stream;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::transport::{ConnectionPool, Outbound, OutboundReceiver};

    type Inbound = Result<Message, WsError>;

    /// Inbound stream fed from a channel, ending when the sender drops.
    fn channel_stream(rx: mpsc::UnboundedReceiver<Inbound>) -> impl Stream<Item = Inbound> + Unpin {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        }))
    }

    fn router() -> MessageRouter {
        MessageRouter::new(Arc::new(ConnectionPool::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        )))
    }

    fn text(frame: &str) -> Inbound {
        Ok(Message::Text(frame.to_string().into()))
    }

    async fn next_json(rx: &mut OutboundReceiver) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame in time");
        match frame {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).expect("json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_receives_initial_roster_and_is_removed_on_end() {
        let router = router();
        let pool = Arc::clone(router.pool());
        let (vehicle, _v_rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(vehicle).expect("add vehicle");

        let (client, mut rx) = Connection::new(None);
        pool.add(Arc::clone(&client)).expect("add client");

        Session::new(Arc::clone(&client), router)
            .run(stream::iter(Vec::new()))
            .await;

        let roster = next_json(&mut rx).await;
        assert_eq!(roster["type"], "vehicle_list");
        assert_eq!(roster["data"]["vehicles"][0]["vehicle_id"], "v1");

        assert!(client.is_closed());
        assert!(pool.get(client.id()).is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_gets_pong() {
        let router = router();
        let pool = Arc::clone(router.pool());
        let (vehicle, mut rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(Arc::clone(&vehicle)).expect("add");

        Session::new(Arc::clone(&vehicle), router)
            .run(stream::iter(vec![text(r#"{"type":"heartbeat"}"#)]))
            .await;

        assert_eq!(next_json(&mut rx).await["type"], "pong");
        assert!(pool.device(&DeviceId::new("v1")).is_none());
    }

    #[tokio::test]
    async fn test_register_promotes_connection() {
        let router = router();
        let pool = Arc::clone(router.pool());
        let (conn, _rx) = Connection::new(None);
        pool.add(Arc::clone(&conn)).expect("add");

        let (tx, inbound) = mpsc::unbounded_channel();
        let session = tokio::spawn(Session::new(Arc::clone(&conn), router).run(channel_stream(inbound)));

        tx.send(text(r#"{"type":"register","data":{"vehicle_id":"v7"}}"#))
            .expect("send");
        tx.send(text(r#"{"type":"client_register","data":{"client_id":"ui"}}"#))
            .expect("send");
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while pool.device(&DeviceId::new("v7")).is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("promoted");
        assert!(conn.is_device());
        assert_eq!(pool.stats().client_count, 0);

        drop(tx);
        session.await.expect("join");
        assert!(pool.device(&DeviceId::new("v7")).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_is_rejected() {
        let router = router();
        let pool = Arc::clone(router.pool());
        let (holder, _holder_rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(Arc::clone(&holder)).expect("add");

        let (conn, mut rx) = Connection::new(None);
        pool.add(Arc::clone(&conn)).expect("add");

        Session::new(Arc::clone(&conn), router)
            .run(stream::iter(vec![text(
                r#"{"type":"register","data":{"vehicle_id":"v1"}}"#,
            )]))
            .await;

        // Initial roster first, then the rejection.
        assert_eq!(next_json(&mut rx).await["type"], "vehicle_list");
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["data"]["code"], "DUPLICATE_VEHICLE_ID");

        let held = pool.device(&DeviceId::new("v1")).expect("still held");
        assert!(Arc::ptr_eq(&held, &holder));
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_end_session() {
        let router = router();
        let pool = Arc::clone(router.pool());
        let (conn, mut rx) = Connection::new(None);
        pool.add(Arc::clone(&conn)).expect("add");

        Session::new(Arc::clone(&conn), router)
            .run(stream::iter(vec![
                text("not json"),
                Ok(Message::Binary(vec![1, 2, 3].into())),
                text(r#"{"type":"get_vehicle_list"}"#),
            ]))
            .await;

        assert_eq!(next_json(&mut rx).await["type"], "vehicle_list");
        assert_eq!(next_json(&mut rx).await["type"], "vehicle_list");
    }

    #[tokio::test]
    async fn test_gateway_close_ends_session() {
        let router = router();
        let pool = Arc::clone(router.pool());
        let (vehicle, _rx) = Connection::new(Some(DeviceId::new("v1")));
        pool.add(Arc::clone(&vehicle)).expect("add");

        let (_tx, inbound) = mpsc::unbounded_channel();
        let session = tokio::spawn(Session::new(Arc::clone(&vehicle), router).run(channel_stream(inbound)));

        tokio::task::yield_now().await;
        vehicle.close();

        tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .expect("session ends")
            .expect("join");
        assert!(pool.device(&DeviceId::new("v1")).is_none());
    }
}
