//! Lucky Jet terminal client
//!
//! Follows the round and logs it. With `LUCKY_JET_AUTO_BET` set, joins every
//! round with that stake, cashing out at `LUCKY_JET_AUTO_CASHOUT` (default 2.0).

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lucky_jet_client::{
    BalanceLedger, ClientConfig, ClientEvent, ClientSession, GameClient, InMemoryLedger,
    RoundPhase, SessionEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig::from_env();
    let auto_bet = env_f64("LUCKY_JET_AUTO_BET");
    let auto_cashout = env_f64("LUCKY_JET_AUTO_CASHOUT").unwrap_or(2.0);
    info!("Player {} connecting to {}", config.player_id, config.url);

    let mut ledger = InMemoryLedger::default();
    ledger.subscribe(|balance| info!("Balance: {:.2}", balance));
    let mut session = ClientSession::new(config.player_id.clone(), ledger);

    let (client, mut events) = GameClient::spawn(config);

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, disconnecting");
                break;
            }
        };

        match event {
            Some(ClientEvent::Connected) => info!("Connected, waiting for game state"),
            Some(ClientEvent::Disconnected) => {
                warn!("Disconnected; multiplier frozen at {:.2}x", session.view().multiplier);
                session.on_disconnected();
            }
            Some(ClientEvent::Message(msg)) => {
                for event in session.handle_server_message(msg) {
                    log_event(&event, &session);
                }
                if let Some(stake) = auto_bet {
                    if session.can_join() && session.ledger().can_afford(stake) {
                        match session.prepare_join(stake, Some(auto_cashout)) {
                            Ok(msg) => client.send(msg).await?,
                            Err(e) => warn!("Not joining: {}", e),
                        }
                    }
                }
            }
            None => break,
        }
    }

    client.shutdown().await;
    Ok(())
}

fn log_event<L: BalanceLedger>(event: &SessionEvent, session: &ClientSession<L>) {
    match event {
        SessionEvent::Synced(RoundPhase::Waiting) => {
            info!("Next round in {}s (last crash: {:?})", session.view().countdown, session.view().last_crash());
        }
        SessionEvent::Synced(RoundPhase::Crashed) => {
            info!("Crashed at {:.2}x", session.view().crash_point.unwrap_or(session.view().multiplier));
        }
        SessionEvent::Synced(RoundPhase::Running) => {}
        SessionEvent::Countdown(seconds) => info!("Starting in {}s", seconds),
        SessionEvent::Multiplier(m) => tracing::debug!("{:.2}x", m),
        SessionEvent::Joined { amount } => info!("Bet {} placed", amount),
        SessionEvent::Unfunded { amount } => warn!("Bet {} accepted but balance no longer covers it", amount),
        SessionEvent::CashedOut { multiplier, payout } => info!("Cashed out at {:.2}x: +{:.2}", multiplier, payout),
        SessionEvent::Won { payout } => info!("Won {:.2}", payout),
        SessionEvent::Lost { amount } => info!("Lost {:.2}", amount),
        SessionEvent::Rejected { intent, reason } => warn!("{:?} rejected: {:?}", intent, reason),
        SessionEvent::Pong { rtt_ms } => tracing::debug!("Ping {}ms", rtt_ms),
        SessionEvent::Shutdown(reason) => warn!("Server shutting down: {}", reason),
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
