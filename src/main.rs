//! `vehicle-gateway` binary.
//!
//! Loads the configuration, starts the WebSocket gateway and the HTTP API,
//! and runs until `SIGINT` or `SIGTERM`.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use vehicle_gateway::api::{self, ApiState};
use vehicle_gateway::config::{Args, GatewayConfig, LogFormat, LogSection};
use vehicle_gateway::protocol::encode_vehicle_list;
use vehicle_gateway::{CameraBridge, ConnectionPool, GatewayServer, MessageRouter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let from_file = GatewayConfig::load_optional(&args.config)?;
    let file_missing = from_file.is_none();
    let mut config = from_file.unwrap_or_default();
    args.apply(&mut config);

    init_logging(&config.log);

    if file_missing {
        warn!(path = %args.config.display(), "Config file not found, using defaults");
    }
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {e}");
    }

    // Pool and roster fan-out
    let pool = Arc::new(ConnectionPool::new(
        config.heartbeat_check_interval(),
        config.heartbeat_timeout(),
    ));
    pool.set_roster_handler({
        let pool = Arc::downgrade(&pool);
        move |roster| {
            let Some(pool) = pool.upgrade() else {
                return;
            };
            match encode_vehicle_list(&roster) {
                Ok(frame) => {
                    if let Err(e) = pool.broadcast_to_clients(&frame) {
                        warn!(error = %e, "Roster broadcast incomplete");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode roster"),
            }
        }
    });
    let monitor = pool.start_liveness_monitor();

    // Shutdown signal shared by both servers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // WebSocket gateway
    let router = MessageRouter::new(Arc::clone(&pool));
    let server = GatewayServer::bind(config.ws_addr(), config.server.ws_path.as_str(), router)
        .await
        .context("failed to bind WebSocket listener")?;
    info!(url = %server.ws_url(), "Vehicle gateway started");

    // HTTP API
    let camera = CameraBridge::new(Arc::clone(&pool), config.request_timeout());
    let state = ApiState::new(Arc::clone(&pool), camera, config.default_vehicle_id());
    let http = tokio::spawn(api::serve(
        config.http_addr(),
        state,
        shutdown_future(shutdown_rx.clone()),
    ));

    server.run(shutdown_future(shutdown_rx)).await;

    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP API failed"),
        Err(e) => error!(error = %e, "HTTP API task panicked"),
    }

    pool.stop();
    if let Err(e) = monitor.await {
        error!(error = %e, "Liveness monitor task failed");
    }

    info!(connections = pool.connection_count(), "Vehicle gateway stopped");
    Ok(())
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the config.
fn init_logging(log: &LogSection) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone.
async fn shutdown_future(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
