//! Broadcast Channel
//!
//! Fans round state out to every connected client.
//!
//! - `ClientRegistry` is the shared connection set. Connection tasks remove
//!   themselves on disconnect; only the orchestrator adds and sends.
//! - `BroadcastChannel` is owned by the orchestrator and adds the full-state
//!   rate limit on top of the registry.
//!
//! Delivery is best-effort: a client whose queue is full misses that message
//! and catches up on the next one, since every message carries absolute state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::network::protocol::{GameStateSnapshot, ServerMessage};

/// Per-connection identifier.
pub type ConnectionId = u64;

/// Shared set of connected clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub async fn insert(&self, id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.clients.write().await.insert(id, sender);
    }

    /// Remove a client. Returns whether it was present.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Number of connected clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send to one client. Returns whether the message was queued.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let clients = self.clients.read().await;
        match clients.get(&id) {
            Some(sender) => try_deliver(id, sender, message),
            None => false,
        }
    }

    /// Send to every client without waiting. Returns how many queued it.
    pub async fn fan_out(&self, message: &ServerMessage) -> usize {
        let clients = self.clients.read().await;
        clients.iter()
            .filter(|(id, sender)| try_deliver(**id, sender, message.clone()))
            .count()
    }
}

fn try_deliver(id: ConnectionId, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("Client {} queue full, dropping message", id);
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Result of a full-state broadcast request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullBroadcast {
    /// Sent to all clients now.
    Sent,
    /// Held back by the rate limit; flush at the given instant.
    Deferred(Instant),
}

/// Orchestrator-side broadcast handle with the full-state rate limit.
pub struct BroadcastChannel {
    registry: Arc<ClientRegistry>,
    min_full_interval: Duration,
    last_full: Option<Instant>,
    pending_full: Option<GameStateSnapshot>,
}

impl BroadcastChannel {
    /// Wrap a registry.
    pub fn new(registry: Arc<ClientRegistry>, min_full_interval: Duration) -> Self {
        Self {
            registry,
            min_full_interval,
            last_full: None,
            pending_full: None,
        }
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Register a new client, sending it a snapshot before any incremental
    /// broadcast can reach it.
    pub async fn register(
        &self,
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
        snapshot: GameStateSnapshot,
    ) {
        try_deliver(id, &sender, ServerMessage::GameState(snapshot));
        self.registry.insert(id, sender).await;
    }

    /// Broadcast a full snapshot, at most once per minimum interval.
    ///
    /// A snapshot inside the interval replaces any pending one and is sent by
    /// [`BroadcastChannel::flush`] once the interval has passed.
    pub async fn broadcast_full(&mut self, snapshot: GameStateSnapshot, now: Instant) -> FullBroadcast {
        if let Some(last) = self.last_full {
            let ready_at = last + self.min_full_interval;
            if now < ready_at {
                self.pending_full = Some(snapshot);
                return FullBroadcast::Deferred(ready_at);
            }
        }

        self.send_full(snapshot, now).await;
        FullBroadcast::Sent
    }

    /// When a deferred snapshot is due, if any.
    pub fn flush_deadline(&self) -> Option<Instant> {
        match (&self.pending_full, self.last_full) {
            (Some(_), Some(last)) => Some(last + self.min_full_interval),
            (Some(_), None) => Some(Instant::now()),
            _ => None,
        }
    }

    /// Send the pending snapshot if its interval has passed.
    pub async fn flush(&mut self, now: Instant) -> bool {
        match self.flush_deadline() {
            Some(deadline) if now >= deadline => {
                if let Some(snapshot) = self.pending_full.take() {
                    self.send_full(snapshot, now).await;
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Broadcast the countdown. Not rate limited.
    pub async fn broadcast_countdown(&self, seconds: u32) -> usize {
        self.registry.fan_out(&ServerMessage::Countdown(seconds)).await
    }

    /// Broadcast the multiplier. Not rate limited.
    pub async fn broadcast_multiplier(&self, multiplier: f64) -> usize {
        self.registry.fan_out(&ServerMessage::Multiplier(multiplier)).await
    }

    /// Reply to a single client.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        self.registry.send_to(id, message).await
    }

    async fn send_full(&mut self, snapshot: GameStateSnapshot, now: Instant) {
        self.pending_full = None;
        self.last_full = Some(now);
        self.registry.fan_out(&ServerMessage::GameState(snapshot)).await;
    }
}
