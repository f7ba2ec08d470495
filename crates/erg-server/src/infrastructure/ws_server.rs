//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Accepting incoming TCP connections.
//! 2. Upgrading each one to a WebSocket with an 8 KiB message limit.
//! 3. Running each connection's pumps on its own task.
//! 4. Handing those tasks back when the shutdown signal arrives, so the
//!    caller can join them after the hub has closed their queues.
//!
//! The accept loop never blocks on a connection: the handshake itself runs
//! inside the spawned task.

use std::net::SocketAddr;

use anyhow::Context;
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, warn};

use crate::application::{DeviceControl, Router};
use crate::domain::ConnectionConfig;
use crate::infrastructure::connection::serve_connection;
use crate::infrastructure::hub::{ConnectionHandle, HubHandle, InboundHandler, SendOutcome};

/// Binds the subscriber listener.
///
/// # Errors
///
/// Returns an error if the address is in use or cannot be bound.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Accepts subscribers until `shutdown` flips to `true`.
///
/// Returns the connection tasks that are still running.  They finish on
/// their own once the hub shuts down and closes their queues.
pub async fn run_server(
    listener: TcpListener,
    hub: HubHandle,
    config: ConnectionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    if let Ok(addr) = listener.local_addr() {
        info!("listening for subscribers on ws://{addr}");
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("shutdown requested; no longer accepting connections");
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("new connection from {peer}");
                    connections.spawn(handle_connection(stream, peer, hub.clone(), config));
                }
                Err(e) => error!("accept error: {e}"),
            },
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = result {
                    error!("connection task failed: {e}");
                }
            }
        }
    }

    connections
}

/// Upgrades one TCP stream and serves it.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: HubHandle, config: ConnectionConfig) {
    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_message_size),
        ..WebSocketConfig::default()
    };

    let ws = match timeout(config.write_timeout, accept_async_with_config(stream, Some(ws_config))).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake failed with {peer}: {e}");
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {peer} timed out");
            return;
        }
    };

    info!("subscriber connected from {peer}");
    serve_connection(ws, hub, config).await;
}

// ── Router adapter ────────────────────────────────────────────────────────────

/// Runs the router for each inbound message and queues the encoded reply
/// for its sender only.
#[async_trait]
impl<C> InboundHandler for Router<C>
where
    C: DeviceControl + 'static,
{
    async fn handle(&self, from: ConnectionHandle, payload: String) {
        let reply = self.dispatch(&payload).await;
        let encoded = match erg_core::encode_reply(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("failed to encode reply: {e}");
                return;
            }
        };
        if from.send(encoded) == SendOutcome::Closed {
            debug!(connection = %from.id(), "sender gone before reply");
        }
    }
}
