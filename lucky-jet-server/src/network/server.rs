//! WebSocket Game Server
//!
//! Accepts client connections and runs the round orchestrator.
//!
//! One orchestrator task owns the `RoundEngine`. Connection tasks never touch
//! round state: they forward parsed intents over a command channel and the
//! orchestrator replies through the client's outbound queue. The countdown,
//! multiplier and restart timers all live in the orchestrator's `select!` loop,
//! so every mutation is serialized.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RoundConfig, ServerConfig};
use crate::game::engine::{now_ms, CountdownTick, CrashReport, MultiplierTick, RoundEngine};
use crate::game::round::{
    CashoutReceipt, IntentRejection, PlayerId, RejectReason, RoundError, RoundId, RoundPhase,
};
use crate::network::broadcast::{BroadcastChannel, ClientRegistry, ConnectionId, FullBroadcast};
use crate::network::protocol::{
    CashoutAccepted, CashoutRequest, ClientMessage, GameStateSnapshot, IntentKind, JoinAccepted,
    JoinRequest, Rejection, ServerMessage,
};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Work items for the orchestrator.
#[derive(Debug)]
enum Command {
    /// New client: send it a snapshot, then add it to the broadcast set.
    Connect {
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Client went away.
    Disconnect { id: ConnectionId },
    /// Client asked for a full snapshot.
    RequestState { id: ConnectionId },
    /// Join intent.
    Join { id: ConnectionId, request: JoinRequest },
    /// Cashout intent.
    Cashout { id: ConnectionId, request: CashoutRequest },
    /// Client-declared crash, never honored.
    Crash { id: ConnectionId },
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connected clients.
    registry: Arc<ClientRegistry>,
    /// Open sockets, including those still handshaking.
    active_connections: Arc<AtomicUsize>,
    /// Connection id source.
    next_connection_id: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Run on an already bound listener with a fresh engine.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let engine = RoundEngine::new(self.config.round.clone());
        self.serve_with_engine(listener, engine).await
    }

    /// Run on an already bound listener, driving the given engine.
    #[instrument(skip_all)]
    pub async fn serve_with_engine(
        &self,
        listener: TcpListener,
        engine: RoundEngine,
    ) -> Result<(), GameServerError> {
        let local_addr = listener.local_addr()?;
        info!("Game server v{} listening on {}", self.config.version, local_addr);

        let (command_tx, command_rx) = mpsc::channel::<Command>(1024);
        let orchestrator = RoundOrchestrator::new(engine, self.registry.clone());
        let orchestrator_handle = tokio::spawn(orchestrator.run(command_rx, self.shutdown_tx.subscribe()));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(e) = self.admit(stream, addr, &command_tx) {
                                warn!("Rejecting {}: {}", addr, e);
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = orchestrator_handle.await {
            return Err(GameServerError::Internal(format!("orchestrator task failed: {e}")));
        }
        Ok(())
    }

    /// Enforce the connection limit, then hand the socket to its own task.
    fn admit(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        commands: &mpsc::Sender<Command>,
    ) -> Result<(), GameServerError> {
        let active = self.active_connections.fetch_add(1, Ordering::SeqCst);
        if active >= self.config.max_connections {
            self.active_connections.fetch_sub(1, Ordering::SeqCst);
            return Err(GameServerError::ConnectionLimitReached);
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        debug!("New connection {} from {}", id, addr);
        self.handle_connection(stream, addr, id, commands.clone());
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        id: ConnectionId,
        commands: mpsc::Sender<Command>,
    ) {
        let registry = self.registry.clone();
        let active_connections = self.active_connections.clone();
        let queue_capacity = self.config.client_queue_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    active_connections.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(queue_capacity);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            if commands.send(Command::Connect { id, sender: msg_tx.clone() }).await.is_err() {
                warn!("Orchestrator gone, dropping connection {}", id);
            } else {
                info!("Client {} connected from {}", id, addr);
            }

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", id, e);
                                        continue;
                                    }
                                };
                                if !Self::route_client_message(id, client_msg, &commands, &msg_tx).await {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", id);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", id, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            registry.remove(id).await;
            let _ = commands.send(Command::Disconnect { id }).await;
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Sender for {} did not drain in time", id);
            }
            active_connections.fetch_sub(1, Ordering::SeqCst);

            info!("Client {} cleaned up", id);
        });
    }

    /// Forward a parsed message. Returns `false` once the orchestrator is gone.
    async fn route_client_message(
        id: ConnectionId,
        msg: ClientMessage,
        commands: &mpsc::Sender<Command>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> bool {
        let command = match msg {
            ClientMessage::RequestGameState => Command::RequestState { id },
            ClientMessage::Join(request) => Command::Join { id, request },
            ClientMessage::Cashout(request) => Command::Cashout { id, request },
            ClientMessage::Crash(_) => Command::Crash { id },
            ClientMessage::Ping { timestamp } => {
                let _ = sender.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: now_ms().max(0) as u64,
                });
                return true;
            }
        };
        commands.send(command).await.is_ok()
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }
}

// =============================================================================
// ROUND ORCHESTRATOR
// =============================================================================

/// Single writer of round state.
struct RoundOrchestrator {
    engine: RoundEngine,
    channel: BroadcastChannel,
    /// Last connection each player acted from, for auto-cashout notices.
    player_connections: BTreeMap<PlayerId, ConnectionId>,
}

impl RoundOrchestrator {
    fn new(engine: RoundEngine, registry: Arc<ClientRegistry>) -> Self {
        let min_interval = engine.config().full_broadcast_min_interval;
        Self {
            engine,
            channel: BroadcastChannel::new(registry, min_interval),
            player_connections: BTreeMap::new(),
        }
    }

    fn round_config(&self) -> &RoundConfig {
        self.engine.config()
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut shutdown: broadcast::Receiver<()>) {
        let second = Duration::from_secs(1);
        let mut countdown = tokio::time::interval_at(Instant::now() + second, second);
        let mut ticker = interval(self.round_config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let restart = sleep(self.round_config().post_crash_delay);
        tokio::pin!(restart);

        let mut state = self.state_key();
        self.enter_phase(state.1, &mut countdown, &mut ticker, restart.as_mut());
        info!("Round {} created", self.engine.round().id().short());

        loop {
            let phase = state.1;
            let flush_at = self.channel.flush_deadline().map(Instant::from_std);

            tokio::select! {
                _ = countdown.tick(), if phase == RoundPhase::Waiting => {
                    self.on_countdown(Instant::now()).await;
                }
                _ = ticker.tick(), if phase == RoundPhase::Running => {
                    self.on_multiplier(Instant::now()).await;
                }
                _ = &mut restart, if phase == RoundPhase::Crashed => {
                    self.on_restart().await;
                }
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.channel.flush(std::time::Instant::now()).await;
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => self.on_command(command).await,
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }

            let next = self.state_key();
            if next != state {
                self.enter_phase(next.1, &mut countdown, &mut ticker, restart.as_mut());
                state = next;
            }
        }

        info!("Round orchestrator stopped");
    }

    fn state_key(&self) -> (RoundId, RoundPhase) {
        (self.engine.round().id(), self.engine.phase())
    }

    /// Re-arm the timer belonging to the phase just entered.
    fn enter_phase(
        &self,
        phase: RoundPhase,
        countdown: &mut tokio::time::Interval,
        ticker: &mut tokio::time::Interval,
        restart: std::pin::Pin<&mut tokio::time::Sleep>,
    ) {
        match phase {
            RoundPhase::Waiting => countdown.reset(),
            RoundPhase::Running => ticker.reset(),
            RoundPhase::Crashed => restart.reset(Instant::now() + self.round_config().post_crash_delay),
        }
    }

    async fn on_countdown(&mut self, now: Instant) {
        match self.engine.on_countdown_tick(now.into_std()) {
            Ok(CountdownTick::Counting(remaining)) => {
                self.channel.broadcast_countdown(remaining).await;
            }
            Ok(CountdownTick::Started) => {
                info!("Round {} running", self.engine.round().id().short());
                self.channel.broadcast_countdown(0).await;
                self.broadcast_full().await;
            }
            Err(e) => self.recover(e).await,
        }
    }

    async fn on_multiplier(&mut self, now: Instant) {
        match self.engine.on_multiplier_tick(now.into_std()) {
            Ok(MultiplierTick::Rising { multiplier, auto_cashouts }) => {
                self.channel.broadcast_multiplier(multiplier).await;
                if !auto_cashouts.is_empty() {
                    self.notify_cashouts(&auto_cashouts).await;
                    self.broadcast_full().await;
                }
            }
            Ok(MultiplierTick::Crashed(report)) => {
                self.on_crash(report).await;
            }
            Err(e) => self.recover(e).await,
        }
    }

    async fn on_crash(&mut self, report: CrashReport) {
        info!(
            "Round {} crashed at {:.2}x ({} won, {} lost)",
            report.round_id.short(),
            report.crash_point,
            report.winners.len(),
            report.losers.len(),
        );
        self.notify_cashouts(&report.auto_cashouts).await;
        self.channel.broadcast_multiplier(report.crash_point).await;
        self.broadcast_full().await;
    }

    async fn on_restart(&mut self) {
        match self.engine.begin_next_round() {
            Ok(round) => {
                info!("Round {} created", round.id().short());
                self.player_connections.clear();
                self.broadcast_full().await;
            }
            Err(e) => self.recover(e).await,
        }
    }

    /// A faulted tick never leaves the loop stuck: start over from `Waiting`.
    async fn recover(&mut self, e: RoundError) {
        error!("Round {} faulted: {}; restarting", self.engine.round().id().short(), e);
        let round = self.engine.reset();
        info!("Round {} created", round.id().short());
        self.player_connections.clear();
        self.broadcast_full().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { id, sender } => {
                let snapshot = GameStateSnapshot::from_engine(&self.engine);
                self.channel.register(id, sender, snapshot).await;
            }
            Command::Disconnect { id } => {
                self.channel.registry().remove(id).await;
                self.player_connections.retain(|_, conn| *conn != id);
            }
            Command::RequestState { id } => {
                let snapshot = GameStateSnapshot::from_engine(&self.engine);
                self.channel.send_to(id, ServerMessage::GameState(snapshot)).await;
            }
            Command::Join { id, request } => self.on_join(id, request).await,
            Command::Cashout { id, request } => self.on_cashout(id, request).await,
            Command::Crash { id } => {
                debug!("Client {} tried to declare a crash", id);
                self.reject(id, IntentKind::Crash, RejectReason::CrashIsServerAuthoritative.into()).await;
            }
        }
    }

    async fn on_join(&mut self, id: ConnectionId, request: JoinRequest) {
        let JoinRequest { player_id, bet_amount, auto_cashout } = request;
        match self.engine.join(player_id.clone(), bet_amount, auto_cashout) {
            Ok(game_id) => {
                debug!("Player {} joined round {} with {}", player_id, game_id.short(), bet_amount);
                self.player_connections.insert(player_id, id);
                self.channel.send_to(id, ServerMessage::JoinAccepted(JoinAccepted {
                    game_id,
                    bet_amount,
                })).await;
                self.broadcast_full().await;
            }
            Err(rejection) => {
                debug!("Join from {} rejected: {}", player_id, rejection);
                self.reject(id, IntentKind::Join, rejection).await;
            }
        }
    }

    async fn on_cashout(&mut self, id: ConnectionId, request: CashoutRequest) {
        match self.engine.cashout(&request.player_id) {
            Ok(receipt) => {
                debug!("Player {} cashed out at {:.2}x", receipt.player_id, receipt.multiplier);
                self.player_connections.insert(receipt.player_id.clone(), id);
                self.channel.send_to(id, ServerMessage::CashoutAccepted(CashoutAccepted::from(&receipt))).await;
                self.broadcast_full().await;
            }
            Err(rejection) => {
                debug!("Cashout from {} rejected: {}", request.player_id, rejection);
                self.reject(id, IntentKind::Cashout, rejection).await;
            }
        }
    }

    async fn reject(&self, id: ConnectionId, intent: IntentKind, rejection: IntentRejection) {
        self.channel.send_to(id, ServerMessage::Rejected(Rejection {
            intent,
            reason: rejection.reason,
        })).await;
    }

    async fn notify_cashouts(&self, receipts: &[CashoutReceipt]) {
        for receipt in receipts {
            debug!("Auto cashout for {} at {:.2}x", receipt.player_id, receipt.multiplier);
            if let Some(&conn) = self.player_connections.get(&receipt.player_id) {
                self.channel.send_to(conn, ServerMessage::CashoutAccepted(CashoutAccepted::from(receipt))).await;
            }
        }
    }

    async fn broadcast_full(&mut self) {
        let snapshot = GameStateSnapshot::from_engine(&self.engine);
        if let FullBroadcast::Deferred(at) = self.channel.broadcast_full(snapshot, std::time::Instant::now()).await {
            debug!("Full-state broadcast deferred by {:?}", at.saturating_duration_since(std::time::Instant::now()));
        }
    }
}
