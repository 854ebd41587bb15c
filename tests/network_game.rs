use actix::prelude::*;
use actix_web::{web, App, HttpServer};
use std::time::Duration;

use mesh_chess::controller::{
    AcceptChallenge, ChallengePlayer, ConnectPresence, GetSnapshot, HostGame, JoinGame, NetScreen, Resign,
    SessionController, Snapshot, SubmitMove,
};
use mesh_chess::game::{Color, GameStatus};
use mesh_chess::models::config::Settings;
use mesh_chess::models::{AppState, GameMode, MoveRequest};
use mesh_chess::routes::configure_routes;

/// Start a relay on an ephemeral port and return its websocket URL
fn start_relay() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = web::Data::new(AppState::default());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, env!("CARGO_MANIFEST_DIR")))
    })
    .listen(listener)
    .unwrap()
    .workers(1)
    .disable_signals()
    .run();
    actix_rt::spawn(server);
    format!("ws://127.0.0.1:{}/ws", port)
}

fn controller(signal_url: &str) -> Addr<SessionController> {
    let settings = Settings {
        signal_url: signal_url.to_string(),
        direct_bind_host: "127.0.0.1".to_string(),
        direct_advertise_host: "127.0.0.1".to_string(),
        ..Settings::default()
    };
    SessionController::new(settings).start()
}

async fn wait_for<F>(addr: &Addr<SessionController>, what: &str, check: F) -> Snapshot
where
    F: Fn(&Snapshot) -> bool,
{
    for _ in 0..200 {
        let snapshot = addr.send(GetSnapshot).await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        actix_rt::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn in_network_game(snapshot: &Snapshot) -> bool {
    snapshot.mode == Some(GameMode::Network) && snapshot.status == GameStatus::Playing
}

#[actix_rt::test]
async fn hosted_room_plays_a_game() {
    let url = start_relay();
    let host = controller(&url);
    let guest = controller(&url);

    let code = host
        .send(HostGame {
            time_control_id: "blitz".to_string(),
            room_code: None,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code.len(), 6);
    assert_eq!(host.send(GetSnapshot).await.unwrap().net_screen, NetScreen::Waiting);

    guest
        .send(JoinGame {
            room_code: code.to_lowercase(),
        })
        .await
        .unwrap()
        .unwrap();

    let host_view = wait_for(&host, "host game start", in_network_game).await;
    let guest_view = wait_for(&guest, "guest game start", in_network_game).await;
    assert_eq!(host_view.player_color, Color::White);
    assert_eq!(guest_view.player_color, Color::Black);
    assert_eq!(guest_view.time_control_id, "blitz");
    assert_eq!(guest_view.net_screen, NetScreen::None);

    // Guest may not move for White
    assert!(guest
        .send(SubmitMove(MoveRequest::new([6, 4], [4, 4])))
        .await
        .unwrap()
        .is_err());

    host.send(SubmitMove(MoveRequest::new([6, 4], [4, 4])))
        .await
        .unwrap()
        .unwrap();
    let guest_view = wait_for(&guest, "e2e4 to arrive", |s| s.history.len() == 1).await;
    assert_eq!(guest_view.history, vec!["e2e4".to_string()]);
    assert_eq!(guest_view.turn, Color::Black);

    guest.send(Resign).await.unwrap();
    let host_view = wait_for(&host, "resignation", |s| s.status == GameStatus::Resigned).await;
    assert_eq!(host_view.winner, Some(Color::White));
    assert_eq!(host_view.message, "Opponent resigned");
}

#[actix_rt::test]
async fn lobby_challenge_starts_a_game() {
    let url = start_relay();
    let ada = controller(&url);
    let bo = controller(&url);

    ada.send(ConnectPresence { name: "Ada".to_string() })
        .await
        .unwrap()
        .unwrap();
    bo.send(ConnectPresence { name: "  Bo  ".to_string() })
        .await
        .unwrap()
        .unwrap();

    let lobby = wait_for(&ada, "Bo in the lobby", |s| s.players.len() == 2).await;
    assert!(lobby.players[0].is_self);
    let bo_id = lobby.players[1].id.clone();
    assert_eq!(lobby.players[1].name, "Bo");

    let code = ada
        .send(ChallengePlayer {
            peer_id: bo_id,
            time_control_id: "rapid".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ada.send(GetSnapshot).await.unwrap().outgoing_challenge.map(|c| c.room_code),
        Some(code.clone())
    );

    let incoming = wait_for(&bo, "the challenge", |s| s.incoming_challenge.is_some()).await;
    let challenge = incoming.incoming_challenge.unwrap();
    assert_eq!(challenge.counterparty_name, "Ada");
    assert_eq!(challenge.room_code, code);

    assert_eq!(bo.send(AcceptChallenge).await.unwrap(), Ok(true));

    let ada_view = wait_for(&ada, "challenger game start", in_network_game).await;
    let bo_view = wait_for(&bo, "accepter game start", in_network_game).await;
    assert_eq!(ada_view.player_color, Color::White);
    assert_eq!(bo_view.player_color, Color::Black);
    assert_eq!(bo_view.time_control_id, "rapid");
    assert!(ada_view.outgoing_challenge.is_none());
}
