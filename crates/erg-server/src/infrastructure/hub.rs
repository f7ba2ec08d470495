//! Broadcast hub: the single owner of the subscriber registry.
//!
//! One Tokio task owns a `HashMap<ConnectionId, Sender>` and is the only code
//! that ever touches it.  Everything else talks to that task through
//! channels:
//!
//! ```text
//!   connections ──register/unregister──►┐
//!   monitor loop ──────broadcast───────►├─► Hub task ──try_send──► per-connection queues
//!   connections ───────inbound─────────►┘      │
//!                                              └─► handler tasks (router) ─► reply to sender
//! ```
//!
//! # Slow consumers
//!
//! Fan-out never waits on a subscriber.  A subscriber whose outbound queue is
//! full at the moment of a broadcast is unregistered on the spot; dropping the
//! hub's `Sender` closes its queue, which makes its outbound pump send a Close
//! frame and exit.  One stalled browser tab never delays telemetry for the
//! others.
//!
//! # Inbound handling
//!
//! Each inbound message is handed to the [`InboundHandler`] on a fresh task
//! tracked in a `JoinSet`, so a slow device command never blocks
//! registration or broadcast.  Shutdown waits for those tasks to finish.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::domain::config::HUB_QUEUE_SIZE;

/// Unique identity of one subscriber connection.
pub type ConnectionId = Uuid;

/// One serialized JSON message.  Shared between every queue it fans out to.
pub type Payload = Arc<str>;

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Destination for server-originated events.
///
/// The monitor loop publishes through this trait so it can be tested without
/// a running hub.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Queues `payload` for every subscriber.  Returns `false` when the
    /// message was dropped (hub queue full or hub stopped).
    fn broadcast(&self, payload: String) -> bool;
}

/// Processes one inbound text message from a subscriber.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, from: ConnectionHandle, payload: String);
}

// ── Subscriber side ───────────────────────────────────────────────────────────

/// Result of a non-blocking send to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SendOutcome {
    Queued,
    /// The subscriber's queue was full; the message was discarded.
    Dropped,
    /// The subscriber is gone.
    Closed,
}

/// A registry entry: a connection identity plus the sending half of its
/// outbound queue.
///
/// Handing a `Subscriber` to the hub transfers ownership of the only strong
/// `Sender`.  Once the hub drops it, the queue closes.
#[derive(Debug)]
pub struct Subscriber {
    id: ConnectionId,
    queue: mpsc::Sender<Payload>,
}

impl Subscriber {
    /// Creates a subscriber with a fresh identity and a bounded outbound
    /// queue, returning the receiving half for the connection's writer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (queue, rx) = mpsc::channel(capacity);
        (
            Self {
                id: Uuid::new_v4(),
                queue,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns a handle for addressing replies to this subscriber.
    ///
    /// The handle holds a weak reference to the queue, so it never keeps a
    /// connection's queue open after the hub has let it go.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            queue: self.queue.downgrade(),
        }
    }
}

/// Address of one subscriber, used to send it a direct reply.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    queue: mpsc::WeakSender<Payload>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `payload` for this subscriber without waiting.
    pub fn send(&self, payload: impl Into<Payload>) -> SendOutcome {
        let Some(queue) = self.queue.upgrade() else {
            return SendOutcome::Closed;
        };
        match queue.try_send(payload.into()) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "send buffer full, dropping reply");
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// The set of live subscribers.  Owned exclusively by the hub task.
#[derive(Debug, Default)]
struct Registry {
    clients: HashMap<ConnectionId, mpsc::Sender<Payload>>,
}

impl Registry {
    fn register(&mut self, subscriber: Subscriber) {
        if self.clients.contains_key(&subscriber.id) {
            debug!(connection = %subscriber.id, "duplicate registration ignored");
            return;
        }
        self.clients.insert(subscriber.id, subscriber.queue);
        info!(connection = %subscriber.id, total = self.clients.len(), "client registered");
    }

    /// Removes a subscriber.  Dropping its `Sender` closes its queue, so the
    /// close happens at most once however many times this is called.
    fn unregister(&mut self, id: ConnectionId) {
        if self.clients.remove(&id).is_some() {
            info!(connection = %id, total = self.clients.len(), "client unregistered");
        }
    }

    /// Offers `payload` to every subscriber, evicting any whose queue is
    /// full or closed.  Returns the number of subscribers evicted.
    fn fan_out(&mut self, payload: &Payload) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|id, queue| match queue.try_send(Arc::clone(payload)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, "send buffer full, removing slow client");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "queue already closed, removing client");
                    false
                }
            });
        before - self.clients.len()
    }

    fn len(&self) -> usize {
        self.clients.len()
    }

    fn close_all(&mut self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        count
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

struct Inbound {
    from: ConnectionHandle,
    payload: String,
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Subscriber>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Payload>,
    inbound_tx: mpsc::Sender<Inbound>,
    count_tx: mpsc::UnboundedSender<oneshot::Sender<usize>>,
}

impl HubHandle {
    /// Adds a subscriber to the registry.  Never blocks.
    pub fn register(&self, subscriber: Subscriber) {
        if let Err(e) = self.register_tx.send(subscriber) {
            // The rejected subscriber is dropped here, closing its queue.
            debug!(connection = %e.0.id, "hub stopped, registration refused");
        }
    }

    /// Removes a subscriber from the registry.  Never blocks; unknown ids
    /// are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        if self.unregister_tx.send(id).is_err() {
            trace!(connection = %id, "hub stopped, unregister skipped");
        }
    }

    /// Hands an inbound message to the hub, waiting for queue space.
    ///
    /// Returns `false` once the hub has stopped.
    pub async fn route_inbound(&self, from: ConnectionHandle, payload: String) -> bool {
        self.inbound_tx.send(Inbound { from, payload }).await.is_ok()
    }

    /// Returns the number of registered subscribers, or `None` if the hub
    /// has stopped.
    pub async fn client_count(&self) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        self.count_tx.send(tx).ok()?;
        rx.await.ok()
    }
}

impl EventSink for HubHandle {
    fn broadcast(&self, payload: String) -> bool {
        match self.broadcast_tx.try_send(Payload::from(payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("broadcast buffer full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("hub stopped, broadcast dropped");
                false
            }
        }
    }
}

// ── Hub task ──────────────────────────────────────────────────────────────────

/// The hub before it is started.  Create with [`Hub::new`], then
/// [`Hub::spawn`] it with the handler for inbound messages.
pub struct Hub {
    register_rx: mpsc::UnboundedReceiver<Subscriber>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Payload>,
    inbound_rx: mpsc::Receiver<Inbound>,
    count_rx: mpsc::UnboundedReceiver<oneshot::Sender<usize>>,
}

/// A running hub.  Call [`HubTask::shutdown`] to stop it.
pub struct HubTask {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(HUB_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(HUB_QUEUE_SIZE);
        let (count_tx, count_rx) = mpsc::unbounded_channel();

        let hub = Self {
            register_rx,
            unregister_rx,
            broadcast_rx,
            inbound_rx,
            count_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            inbound_tx,
            count_tx,
        };
        (hub, handle)
    }

    /// Starts the hub loop on its own task.
    pub fn spawn(self, handler: Arc<dyn InboundHandler>) -> HubTask {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(handler, shutdown_rx));
        HubTask { shutdown_tx, join }
    }

    async fn run(mut self, handler: Arc<dyn InboundHandler>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut registry = Registry::default();
        let mut handlers = JoinSet::new();

        info!("hub started");

        loop {
            // `biased` keeps a single producer's register → broadcast →
            // unregister sequence in order across the separate channels.
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => break,

                Some(subscriber) = self.register_rx.recv() => registry.register(subscriber),

                Some(payload) = self.broadcast_rx.recv() => {
                    let evicted = registry.fan_out(&payload);
                    if evicted > 0 {
                        debug!(evicted, remaining = registry.len(), "evicted clients during broadcast");
                    }
                }

                Some(id) = self.unregister_rx.recv() => registry.unregister(id),

                Some(Inbound { from, payload }) = self.inbound_rx.recv() => {
                    let handler = Arc::clone(&handler);
                    handlers.spawn(async move { handler.handle(from, payload).await });
                }

                Some(reply) = self.count_rx.recv() => {
                    let _ = reply.send(registry.len());
                }

                Some(result) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = result {
                        error!("inbound handler failed: {e}");
                    }
                }
            }
        }

        let closed = registry.close_all();
        info!(closed, "hub stopping, waiting for in-flight handlers");

        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                error!("inbound handler failed: {e}");
            }
        }

        info!("hub stopped");
    }
}

impl HubTask {
    /// Stops the hub: closes every subscriber queue, then waits for
    /// in-flight inbound handlers to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            error!("hub task failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
