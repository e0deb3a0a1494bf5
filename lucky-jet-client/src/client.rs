//! WebSocket client for connecting to the game server
//!
//! A background task owns the socket and reconnects with a fixed delay.
//! Every (re)connect starts with `requestGameState`, and consumers get a
//! `Disconnected` event so they can stop trusting increments until the
//! snapshot arrives.

use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::messages::{ClientMessage, ServerMessage};

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3001";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    /// How often to ping the server while connected.
    pub ping_interval: Duration,
    pub player_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay: Duration::from_secs(2),
            ping_interval: Duration::from_secs(5),
            player_id: random_player_id(),
        }
    }
}

impl ClientConfig {
    /// Read `LUCKY_JET_URL` and `LUCKY_JET_PLAYER_ID`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("LUCKY_JET_URL") {
            config.url = url;
        }
        if let Ok(player_id) = std::env::var("LUCKY_JET_PLAYER_ID") {
            if !player_id.trim().is_empty() {
                config.player_id = player_id.trim().to_string();
            }
        }
        config
    }
}

pub fn random_player_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Client stopped")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

/// What the driver reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Message(ServerMessage),
    Disconnected,
}

/// Handle to the background connection task.
pub struct GameClient {
    outgoing: mpsc::Sender<ClientMessage>,
    state: watch::Receiver<ConnectionState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum ConnectionEnd {
    Lost,
    Stopped,
}

impl GameClient {
    /// Start connecting in the background.
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<ClientMessage>(100);
        let (incoming_tx, incoming_rx) = mpsc::channel::<ClientEvent>(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run(config, outgoing_rx, incoming_tx, state_tx, stop_rx));

        let client = Self {
            outgoing: outgoing_tx,
            state: state_rx,
            stop: stop_tx,
            task,
        };
        (client, incoming_rx)
    }

    /// Queue a message. Dropped if the connection is down when it comes up
    /// for sending.
    pub async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.send(msg).await.map_err(|_| ClientError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection state satisfies `f`.
    pub async fn wait_for_state(&mut self, f: impl Fn(ConnectionState) -> bool) -> ConnectionState {
        loop {
            let current = *self.state.borrow_and_update();
            if f(current) {
                return current;
            }
            if self.state.changed().await.is_err() {
                return ConnectionState::Stopped;
            }
        }
    }

    /// Close the socket and stop reconnecting.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!("Client task failed: {}", e);
        }
    }
}

async fn run(
    config: ClientConfig,
    mut outgoing_rx: mpsc::Receiver<ClientMessage>,
    incoming_tx: mpsc::Sender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let _ = state_tx.send(ConnectionState::Connecting);
        info!("Connecting to {}...", config.url);

        match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("WebSocket connected!");
                let _ = state_tx.send(ConnectionState::Connected);
                if incoming_tx.send(ClientEvent::Connected).await.is_err() {
                    break;
                }

                let end = session_loop(ws_stream, config.ping_interval, &mut outgoing_rx, &incoming_tx, &mut stop_rx).await;
                let _ = state_tx.send(ConnectionState::Disconnected);
                if incoming_tx.send(ClientEvent::Disconnected).await.is_err() {
                    break;
                }
                if let ConnectionEnd::Stopped = end {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to connect to server: {}", e);
                let _ = state_tx.send(ConnectionState::Disconnected);
            }
        }

        if *stop_rx.borrow() {
            break;
        }

        // Intents queued while offline would be stale by the time we're back.
        while let Ok(msg) = outgoing_rx.try_recv() {
            debug!("Discarding {:?} queued while disconnected", msg);
        }

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = stop_rx.changed() => break,
        }
    }

    let _ = state_tx.send(ConnectionState::Stopped);
    info!("Client stopped");
}

async fn session_loop<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    ping_interval: Duration,
    outgoing_rx: &mut mpsc::Receiver<ClientMessage>,
    incoming_tx: &mpsc::Sender<ClientEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) -> ConnectionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    // Resync before trusting any increment.
    if let Err(e) = send_message(&mut write, &ClientMessage::RequestGameState).await {
        error!("Failed to request game state: {}", e);
        return ConnectionEnd::Lost;
    }

    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ServerMessage::from_json(&text) {
                            Ok(server_msg) => {
                                if incoming_tx.send(ClientEvent::Message(server_msg)).await.is_err() {
                                    let _ = write.close().await;
                                    return ConnectionEnd::Stopped;
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse server message: {} - {}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed connection");
                        return ConnectionEnd::Lost;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket read error: {}", e);
                        return ConnectionEnd::Lost;
                    }
                    _ => {}
                }
            }
            out = outgoing_rx.recv() => {
                match out {
                    Some(msg) => {
                        if let Err(e) = send_message(&mut write, &msg).await {
                            error!("Failed to send message: {}", e);
                            return ConnectionEnd::Lost;
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        return ConnectionEnd::Stopped;
                    }
                }
            }
            _ = ping.tick() => {
                if let Err(e) = send_message(&mut write, &ClientMessage::ping()).await {
                    error!("Failed to send ping: {}", e);
                    return ConnectionEnd::Lost;
                }
            }
            _ = stop_rx.changed() => {
                let _ = write.close().await;
                return ConnectionEnd::Stopped;
            }
        }
    }
}

async fn send_message<W>(write: &mut W, msg: &ClientMessage) -> Result<(), ClientError>
where
    W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = msg.to_json()?;
    debug!("Sending: {}", json);
    write.send(Message::Text(json)).await?;
    Ok(())
}
