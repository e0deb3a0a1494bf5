//! Client against a real server over loopback.

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use lucky_jet::game::engine::now_ms;
use lucky_jet::{GameServer, Round, RoundConfig, RoundEngine, ServerConfig};
use lucky_jet_client::messages::{IntentKind, RejectReason};
use lucky_jet_client::{
    BalanceLedger, ClientConfig, ClientEvent, ClientMessage, ClientSession, GameClient,
    InMemoryLedger, RoundPhase, SessionEvent,
};

async fn start_server(crash_point: f64, countdown_secs: u32) -> SocketAddr {
    let round_config = RoundConfig {
        countdown_secs,
        post_crash_delay: Duration::from_millis(500),
        tick_interval: Duration::from_millis(20),
        growth_rate: 1.5,
        ..RoundConfig::default()
    };
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        round: round_config.clone(),
        ..ServerConfig::default()
    };

    let round = Round::new(crash_point, countdown_secs, now_ms());
    let engine = RoundEngine::from_parts(round_config, round, StdRng::seed_from_u64(11));
    let server = GameServer::new(config);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move { server.serve_with_engine(listener, engine).await });
    addr
}

fn client_config(addr: SocketAddr, player_id: &str) -> ClientConfig {
    ClientConfig {
        url: format!("ws://{addr}"),
        reconnect_delay: Duration::from_millis(100),
        ping_interval: Duration::from_millis(200),
        player_id: player_id.to_string(),
    }
}

async fn next_event(events: &mut tokio::sync::mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(15), events.recv())
        .await
        .expect("timed out waiting for the server")
        .expect("client stopped")
}

#[tokio::test]
async fn test_auto_cashout_round_settles_ledger() {
    let addr = start_server(3.0, 2).await;
    let (client, mut events) = GameClient::spawn(client_config(addr, "e2e"));
    let mut session = ClientSession::new("e2e", InMemoryLedger::new(1000.0));
    let mut seen = Vec::new();

    loop {
        if let ClientEvent::Message(msg) = next_event(&mut events).await {
            let produced = session.handle_server_message(msg);
            let won = produced.iter().any(|e| matches!(e, SessionEvent::Won { .. }));
            seen.extend(produced);
            if won {
                break;
            }
            if session.can_join() && session.bet().is_none() {
                let join = session.prepare_join(100.0, Some(1.5)).unwrap();
                client.send(join).await.unwrap();
            }
        }
    }

    assert!(seen.contains(&SessionEvent::Joined { amount: 100.0 }));
    assert!(seen.contains(&SessionEvent::CashedOut { multiplier: 1.5, payout: 150.0 }));
    assert!(seen.contains(&SessionEvent::Won { payout: 150.0 }));
    assert_eq!(session.ledger().balance(), 1050.0);

    let view = session.view();
    assert_eq!(view.phase, Some(RoundPhase::Crashed));
    assert_eq!(view.crash_point, Some(3.0));
    assert_eq!(view.multiplier, 3.0);
    assert_eq!(view.last_crash(), Some(3.0));

    client.shutdown().await;
}

#[tokio::test]
async fn test_late_join_rejected_without_debit() {
    let addr = start_server(50.0, 1).await;
    let (client, mut events) = GameClient::spawn(client_config(addr, "late"));
    let mut session = ClientSession::new("late", InMemoryLedger::new(1000.0));

    // Wait for the round to be running
    loop {
        if let ClientEvent::Message(msg) = next_event(&mut events).await {
            session.handle_server_message(msg);
            if session.view().phase == Some(RoundPhase::Running) {
                break;
            }
        }
    }
    assert!(!session.can_join());

    // Bypass the local check to see the server refuse it
    client.send(ClientMessage::join("late", 100.0, None)).await.unwrap();
    loop {
        if let ClientEvent::Message(msg) = next_event(&mut events).await {
            let produced = session.handle_server_message(msg);
            if let Some(SessionEvent::Rejected { intent, reason }) = produced.first() {
                assert_eq!(*intent, IntentKind::Join);
                assert_eq!(*reason, RejectReason::NotWaiting);
                break;
            }
        }
    }
    assert_eq!(session.ledger().balance(), 1000.0);
    assert!(session.bet().is_none());

    client.shutdown().await;
}
