//! Per-connection duplex pumps.
//!
//! Every subscriber connection runs two loops:
//!
//! - **Inbound pump**: reads frames under a rolling deadline and hands each
//!   text message to the hub.  Any inbound frame (including a pong) restarts
//!   the deadline.
//! - **Outbound pump**: the only writer on the socket.  Drains the
//!   connection's queue, coalescing whatever is already waiting into one
//!   newline-delimited frame, and sends a ping every `ping_interval`.
//!
//! Whichever pump ends first ends the connection.  The connection then
//! unregisters from the hub, which closes its queue; the outbound pump sees
//! the closed queue, sends a Close frame and exits.

use std::fmt;

use erg_core::protocol::append_to_batch;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use crate::domain::ConnectionConfig;
use crate::infrastructure::hub::{ConnectionHandle, ConnectionId, HubHandle, Payload, Subscriber};

// ── Exit reasons ──────────────────────────────────────────────────────────────

/// Why an inbound pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundExit {
    /// Close frame or end of stream.
    PeerClosed,
    /// Nothing arrived within the read timeout.
    ReadTimeout,
    /// A message exceeded the size limit.
    MessageTooLarge,
    ReadError(String),
    HubStopped,
}

/// Why an outbound pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundExit {
    /// The hub closed the queue.
    QueueClosed,
    WriteTimeout,
    WriteError(String),
}

impl fmt::Display for InboundExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::ReadTimeout => f.write_str("read timeout"),
            Self::MessageTooLarge => f.write_str("message too large"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::HubStopped => f.write_str("hub stopped"),
        }
    }
}

impl fmt::Display for OutboundExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueClosed => f.write_str("queue closed"),
            Self::WriteTimeout => f.write_str("write timeout"),
            Self::WriteError(e) => write!(f, "write error: {e}"),
        }
    }
}

// ── Connection lifecycle ──────────────────────────────────────────────────────

/// Serves one upgraded WebSocket until either pump ends.
///
/// Registers with the hub, runs both pumps, then unregisters and waits for
/// the outbound pump to finish its Close frame.
pub async fn serve_connection<S>(ws: WebSocketStream<S>, hub: HubHandle, config: ConnectionConfig)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (subscriber, queue) = Subscriber::new(config.send_buffer);
    let handle = subscriber.handle();
    let id = subscriber.id();
    hub.register(subscriber);

    let (sink, stream) = ws.split();
    let mut writer = tokio::spawn(outbound_pump(sink, queue, config, id));

    let writer_exit = tokio::select! {
        exit = inbound_pump(stream, &handle, &hub, config) => {
            debug!(connection = %id, "inbound pump stopped: {exit}");
            None
        }
        joined = &mut writer => Some(joined),
    };

    hub.unregister(id);

    let exit = match writer_exit {
        Some(joined) => joined,
        None => writer.await,
    };
    match exit {
        Ok(exit) => info!(connection = %id, "connection closed: {exit}"),
        Err(e) => warn!(connection = %id, "outbound pump failed: {e}"),
    }
}

// ── Inbound pump ──────────────────────────────────────────────────────────────

/// Reads frames until the peer goes away, the deadline passes, or a frame
/// breaks the size limit.  Each text message is routed to the hub in
/// arrival order.
pub async fn inbound_pump<St>(
    mut stream: St,
    from: &ConnectionHandle,
    hub: &HubHandle,
    config: ConnectionConfig,
) -> InboundExit
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let message = match timeout(config.read_timeout, stream.next()).await {
            Err(_) => return InboundExit::ReadTimeout,
            Ok(None) => return InboundExit::PeerClosed,
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => {
                return InboundExit::PeerClosed
            }
            Ok(Some(Err(WsError::Capacity(e)))) => {
                debug!(connection = %from.id(), "rejecting oversized frame: {e}");
                return InboundExit::MessageTooLarge;
            }
            Ok(Some(Err(e))) => return InboundExit::ReadError(e.to_string()),
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(connection = %from.id(), "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) => {
                trace!(connection = %from.id(), "liveness frame");
                continue;
            }
            Message::Close(_) => return InboundExit::PeerClosed,
            Message::Frame(_) => continue,
        };

        if text.len() > config.max_message_size {
            return InboundExit::MessageTooLarge;
        }

        if !hub.route_inbound(from.clone(), text).await {
            return InboundExit::HubStopped;
        }
    }
}

// ── Outbound pump ─────────────────────────────────────────────────────────────

/// Writes queued payloads and periodic pings until the queue closes or a
/// write fails.
///
/// Payloads already waiting when a write starts are coalesced into the same
/// frame, separated by newlines, up to one queue's worth.
pub async fn outbound_pump<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Payload>,
    config: ConnectionConfig,
    id: ConnectionId,
) -> OutboundExit
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            next = queue.recv() => match next {
                Some(first) => Message::Text(coalesce(&first, &mut queue, config.send_buffer)),
                None => {
                    // Best effort: the peer may already be gone.
                    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                    return OutboundExit::QueueClosed;
                }
            },
            _ = ping.tick() => {
                trace!(connection = %id, "sending ping");
                Message::Ping(Vec::new())
            }
        };

        match timeout(config.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return OutboundExit::WriteError(e.to_string()),
            Err(_) => return OutboundExit::WriteTimeout,
        }
    }
}

/// Joins `first` with up to `limit` payloads already waiting in `queue`.
fn coalesce(first: &str, queue: &mut mpsc::Receiver<Payload>, limit: usize) -> String {
    let mut frame = String::from(first);
    for _ in 0..limit {
        match queue.try_recv() {
            Ok(next) => append_to_batch(&mut frame, &next),
            Err(_) => break,
        }
    }
    frame
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use erg_core::protocol::split_batch;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;
    use crate::infrastructure::hub::{EventSink, Hub, HubTask, InboundHandler};

    /// Replies `ack:<payload>` to every message.
    struct Ack;

    #[async_trait]
    impl InboundHandler for Ack {
        async fn handle(&self, from: ConnectionHandle, payload: String) {
            let _ = from.send(format!("ack:{payload}"));
        }
    }

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new(Duration::from_secs(10), Duration::from_secs(1))
    }

    fn start_hub() -> (HubTask, HubHandle) {
        let (hub, handle) = Hub::new();
        (hub.spawn(Arc::new(Ack)), handle)
    }

    async fn next_text(client: &mut WebSocketStream<DuplexStream>) -> String {
        loop {
            match client.next().await.expect("stream ended").expect("read failed") {
                Message::Text(text) => return text,
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn test_coalesce_joins_waiting_payloads() {
        // Arrange
        let (tx, mut rx) = mpsc::channel::<Payload>(8);
        tx.try_send(Payload::from("b")).unwrap();
        tx.try_send(Payload::from("c")).unwrap();

        // Act
        let frame = coalesce("a", &mut rx, 8);

        // Assert
        assert_eq!(split_batch(&frame).collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn test_coalesce_respects_limit() {
        let (tx, mut rx) = mpsc::channel::<Payload>(8);
        for p in ["b", "c", "d"] {
            tx.try_send(Payload::from(p)).unwrap();
        }

        let frame = coalesce("a", &mut rx, 1);

        assert_eq!(frame, "a\nb");
        assert_eq!(&*rx.try_recv().unwrap(), "c");
    }

    #[tokio::test]
    async fn test_command_reply_reaches_only_sender() {
        // Arrange
        let (task, hub) = start_hub();
        let (server, mut client) = ws_pair().await;
        let (other_server, mut other_client) = ws_pair().await;
        tokio::spawn(serve_connection(server, hub.clone(), test_config()));
        tokio::spawn(serve_connection(other_server, hub.clone(), test_config()));

        // Act
        client.send(Message::Text("status?".to_string())).await.unwrap();

        // Assert
        assert_eq!(next_text(&mut client).await, "ack:status?");
        wait_for_clients(&hub, 2).await;
        hub.broadcast("event".to_string());
        assert_eq!(next_text(&mut other_client).await, "event");

        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_binary_utf8_frame_is_routed_as_text() {
        let (task, hub) = start_hub();
        let (server, mut client) = ws_pair().await;
        tokio::spawn(serve_connection(server, hub.clone(), test_config()));

        client.send(Message::Binary(b"hello".to_vec())).await.unwrap();

        assert_eq!(next_text(&mut client).await, "ack:hello");
        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_message_closes_connection() {
        // Arrange
        let (task, hub) = start_hub();
        let (server, mut client) = ws_pair().await;
        let conn = tokio::spawn(serve_connection(server, hub.clone(), test_config()));

        // Act
        let big = "x".repeat(8193);
        client.send(Message::Text(big)).await.unwrap();

        // Assert: the server sends Close and the connection task ends
        conn.await.unwrap();
        assert_eq!(hub.client_count().await, Some(0));
        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_hub_shutdown_sends_close_frame() {
        let (task, hub) = start_hub();
        let (server, mut client) = ws_pair().await;
        let conn = tokio::spawn(serve_connection(server, hub.clone(), test_config()));
        wait_for_clients(&hub, 1).await;

        task.shutdown().await;

        let frame = client.next().await.expect("stream ended").unwrap();
        assert!(matches!(frame, Message::Close(_)));
        drop(client);
        conn.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        // Arrange: a peer that never sends anything and never reads
        let (task, hub) = start_hub();
        let (server, _client) = ws_pair().await;
        let config = ConnectionConfig::new(Duration::from_secs(2), Duration::from_millis(100));
        let conn = tokio::spawn(serve_connection(server, hub.clone(), config));

        // Act / Assert: the connection ends on its own once the deadline passes
        tokio::time::timeout(Duration::from_secs(5), conn)
            .await
            .expect("connection should time out")
            .unwrap();
        assert_eq!(hub.client_count().await, Some(0));
        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_outbound_pump_batches_waiting_payloads() {
        // Arrange: three payloads queued before the pump starts
        let (server, mut client) = ws_pair().await;
        let (sink, _stream) = server.split();
        let (tx, rx) = mpsc::channel::<Payload>(8);
        for p in ["one", "two", "three"] {
            tx.try_send(Payload::from(p)).unwrap();
        }
        drop(tx);

        // Act
        let exit = outbound_pump(sink, rx, test_config(), ConnectionId::nil()).await;

        // Assert: one frame carrying all three, then Close
        assert_eq!(exit, OutboundExit::QueueClosed);
        assert_eq!(next_text(&mut client).await, "one\ntwo\nthree");
        assert!(matches!(client.next().await, Some(Ok(Message::Close(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_pump_sends_periodic_pings() {
        let (server, mut client) = ws_pair().await;
        let (sink, _stream) = server.split();
        let (_tx, rx) = mpsc::channel::<Payload>(8);
        let config = ConnectionConfig::new(Duration::from_secs(10), Duration::from_secs(1));
        tokio::spawn(outbound_pump(sink, rx, config, ConnectionId::nil()));

        let frame = client.next().await.unwrap().unwrap();

        assert!(matches!(frame, Message::Ping(_)));
    }

    async fn wait_for_clients(hub: &HubHandle, expected: usize) {
        while hub.client_count().await != Some(expected) {
            tokio::task::yield_now().await;
        }
    }
}
