use actix::fut;
use actix::prelude::*;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::time::Instant;

use crate::controller::{
    AcceptChallenge, ChallengePlayer, ConnectPresence, DeclineChallenge, GameLink, HostGame, JoinGame,
    LinkedPeerEvent, NetRole, NetScreen, PresenceLink, SessionController,
};
use crate::error::{ChallengeRefused, ConnectionError};
use crate::game::Color;
use crate::models::config::{
    clean_player_name, game_room_name, gen_room_code, resolve_time_control, PRESENCE_APP, PRESENCE_ROOM,
};
use crate::models::{decode_payload, encode_payload, ClientMessage, GameMessage, GameMode, LobbyMessage};
use crate::net::rendezvous::meta_patch;
use crate::net::{
    apply_peer_message, check_challenge_target, parse_game_message, presence_meta, Challenge, ChannelUpdate,
    CloseRelay, DirectBackend, LobbyAction, OutboundSignal, PeerLink, PresenceStatus, RelayEvent,
    RendezvousClient, RendezvousConfig, RendezvousEvent, SendRelay, SyncOutcome, Welcome,
};

type WelcomeRx = oneshot::Receiver<Result<Welcome, ConnectionError>>;

fn welcome_result(res: Result<Result<Welcome, ConnectionError>, oneshot::Canceled>) -> Result<Welcome, ConnectionError> {
    res.unwrap_or(Err(ConnectionError::ClosedBeforeWelcome))
}

fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl SessionController {
    fn presence_link_is(&self, link: u64) -> bool {
        self.presence.as_ref().map_or(false, |p| p.link == link)
    }

    fn game_link_is(&self, link: u64) -> bool {
        self.net.as_ref().map_or(false, |n| n.link == link)
    }

    /// Whether a new challenge would have to be turned down
    fn is_busy(&self) -> bool {
        self.net.is_some() || (self.session.mode() == Some(GameMode::Network) && self.session.is_live())
    }

    pub fn send_game_message(&mut self, msg: &GameMessage) {
        let net = match self.net.as_mut() {
            Some(net) => net,
            None => return,
        };
        let peer = match net.peer_id.clone() {
            Some(peer) => peer,
            None => {
                warn!("No opponent to send {:?} to", msg);
                return;
            }
        };
        if let Err(e) = net.peers.send_to(&peer, &encode_payload(msg)) {
            warn!("Error sending game message: {}", e);
        }
    }

    fn send_lobby(&self, to: &str, msg: &LobbyMessage) {
        match &self.presence {
            Some(presence) => presence.client.do_send(SendRelay(ClientMessage::Direct {
                to: to.to_string(),
                payload: encode_payload(msg),
            })),
            None => warn!("Lobby is not connected, dropping {:?}", msg),
        }
    }

    fn relay_signals(&self, signals: Vec<OutboundSignal>) {
        let net = match &self.net {
            Some(net) => net,
            None => return,
        };
        for OutboundSignal { to, signal } in signals {
            net.client.do_send(SendRelay(ClientMessage::Signal { to, signal }));
        }
    }

    pub fn set_presence_status(&mut self, status: PresenceStatus) {
        let presence = match self.presence.as_mut() {
            Some(presence) => presence,
            None => return,
        };
        if let Some(meta) = presence.meta.as_object_mut() {
            meta.insert("status".to_string(), json!(status.as_str()));
        }
        if presence.welcomed {
            presence.client.do_send(SendRelay(meta_patch("status", json!(status.as_str()))));
        }
    }

    pub fn disconnect_net(&mut self) {
        if let Some(mut net) = self.net.take() {
            info!("Closing game room {}", net.room_code);
            net.peers.close();
            net.client.do_send(CloseRelay);
        }
    }

    pub fn disconnect_presence(&mut self) {
        if let Some(presence) = self.presence.take() {
            info!("Leaving the lobby");
            presence.client.do_send(CloseRelay);
        }
        self.challenges.clear();
    }

    /// Connect to the relay room of `room_code` with a fresh peer link
    fn open_game_link(
        &mut self,
        role: NetRole,
        room_code: &str,
        time_control_id: &str,
        ctx: &mut Context<Self>,
    ) -> (u64, WelcomeRx) {
        self.disconnect_net();
        let link = self.next_id();

        let (tx, rx) = mpsc::unbounded();
        let backend = DirectBackend::new(&self.settings.direct_bind_host, &self.settings.direct_advertise_host, tx);
        ctx.add_message_stream(rx.map(move |event| LinkedPeerEvent { link, event }));

        let config = RendezvousConfig {
            url: self.settings.signal_url.clone(),
            app: PRESENCE_APP.to_string(),
            room: game_room_name(room_code),
            meta: json!({ "name": self.player_name }),
        };
        let (client, welcome) = RendezvousClient::connect(link, config, ctx.address().recipient());

        info!("Opening game room {} as {:?}", room_code, role);
        self.net = Some(GameLink {
            link,
            client,
            peers: PeerLink::new(backend),
            role,
            room_code: room_code.to_string(),
            time_control_id: resolve_time_control(time_control_id).id.to_string(),
            peer_id: None,
        });
        self.net_screen = match role {
            NetRole::Host => NetScreen::Waiting,
            NetRole::Guest => NetScreen::Joining,
        };
        (link, welcome)
    }

    /// Give up on a room that could not be reached
    fn game_link_failed(&mut self, link: u64, error: &ConnectionError) {
        if !self.game_link_is(link) {
            return;
        }
        warn!("Game room connection failed: {}", error);
        self.disconnect_net();
        self.challenges.outgoing = None;
        self.net_screen = NetScreen::Lobby;
        self.message = format!("Could not reach signaling server: {}", error);
    }

    fn on_presence_event(&mut self, event: RendezvousEvent) {
        let presence = match self.presence.as_mut() {
            Some(presence) => presence,
            None => return,
        };
        match event {
            RendezvousEvent::Welcomed(welcome) => {
                presence.welcomed = true;
                presence.local_id = Some(welcome.id);
                presence.meta = welcome.meta;
                presence.peer_meta = welcome.peer_meta;
                debug!("Lobby has {} other players", presence.peer_meta.len());
            }
            RendezvousEvent::SelfMeta { meta } => presence.meta = meta,
            RendezvousEvent::PeerJoined { id, meta } | RendezvousEvent::PeerMeta { id, meta } => {
                presence.peer_meta.insert(id, meta);
            }
            RendezvousEvent::PeerLeft { id } => {
                presence.peer_meta.remove(&id);
                if self.challenges.on_peer_left(&id) {
                    self.message = "Challenger went offline".to_string();
                }
            }
            RendezvousEvent::Direct {
                from,
                payload,
                broadcast: false,
            } => self.on_lobby_payload(&from, &payload),
            RendezvousEvent::Direct { .. } | RendezvousEvent::Signal { .. } => {}
            RendezvousEvent::Status(status) => self.message = status,
            RendezvousEvent::Failed(e) => {
                warn!("Lobby connection failed: {}", e);
                self.presence = None;
                self.challenges.clear();
                self.message = format!("Online lobby disconnected: {}", e);
            }
            RendezvousEvent::Closed => {
                info!("Lobby connection closed");
                self.presence = None;
                self.challenges.clear();
            }
        }
    }

    fn on_lobby_payload(&mut self, from: &str, payload: &Value) {
        let msg: LobbyMessage = match decode_payload(payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Ignoring lobby payload from {}: {}", from, e);
                return;
            }
        };
        let busy = self.is_busy();
        match self.challenges.on_lobby_message(from, msg, busy, &self.player_name) {
            LobbyAction::Incoming(challenge) => {
                self.message = format!("{} challenged you", challenge.counterparty_name);
            }
            LobbyAction::AutoDecline { to, reply } => self.send_lobby(&to, &reply),
            LobbyAction::Accepted { by_name } => {
                info!("{} accepted our challenge", by_name);
                self.message = "Challenge accepted. Waiting for game connection...".to_string();
            }
            LobbyAction::Declined { by_name } => {
                self.disconnect_net();
                self.net_screen = NetScreen::Lobby;
                self.set_presence_status(PresenceStatus::Lobby);
                self.message = format!("{} declined your challenge.", by_name);
            }
            LobbyAction::Ignored => {}
        }
    }

    fn on_game_relay_event(&mut self, event: RendezvousEvent) {
        let net = match self.net.as_mut() {
            Some(net) => net,
            None => return,
        };
        match event {
            RendezvousEvent::Welcomed(welcome) => {
                let signals = net.peers.on_welcome(&welcome.id, &welcome.peers, &welcome.peer_meta);
                if net.peer_id.is_none() {
                    net.peer_id = welcome.peers.iter().find(|p| **p != welcome.id).cloned();
                }
                self.message = match (net.role, &net.peer_id) {
                    (NetRole::Host, _) => format!("Room {} is open. Waiting for opponent...", net.room_code),
                    (NetRole::Guest, Some(_)) => "Host found - establishing connection...".to_string(),
                    (NetRole::Guest, None) => "Waiting for host...".to_string(),
                };
                self.relay_signals(signals);
            }
            RendezvousEvent::PeerJoined { id, meta } => {
                let signals = net.peers.on_peer_joined(&id, meta);
                if net.peer_id.is_none() {
                    net.peer_id = Some(id);
                }
                self.message = match net.role {
                    NetRole::Host => "Peer found - establishing connection...".to_string(),
                    NetRole::Guest => "Host found - establishing connection...".to_string(),
                };
                self.relay_signals(signals);
            }
            RendezvousEvent::PeerMeta { id, meta } => net.peers.on_peer_meta(&id, meta),
            RendezvousEvent::PeerLeft { id } => {
                net.peers.on_peer_left(&id);
                if net.peer_id.as_deref() == Some(id.as_str()) {
                    net.peer_id = None;
                    self.message = "Opponent disconnected".to_string();
                }
            }
            RendezvousEvent::Signal { from, signal } => match net.peers.on_signal(&from, signal) {
                Ok(signals) => self.relay_signals(signals),
                Err(e) => warn!("Bad signal from {}: {}", from, e),
            },
            RendezvousEvent::Status(status) => self.message = status,
            RendezvousEvent::Failed(_) | RendezvousEvent::Closed => {
                // An open channel outlives the relay
                if net.peers.open_peers().is_empty() {
                    info!("Game room {} lost before the channel opened", net.room_code);
                    self.disconnect_net();
                    self.net_screen = NetScreen::Lobby;
                    self.message = "Signaling connection closed".to_string();
                } else {
                    debug!("Relay closed, keeping the open channel");
                }
            }
            RendezvousEvent::SelfMeta { .. } | RendezvousEvent::Direct { .. } => {}
        }
    }

    fn on_channel_update(&mut self, update: ChannelUpdate, ctx: &mut Context<Self>) {
        match update {
            ChannelUpdate::None => {}
            ChannelUpdate::Signal(signal) => self.relay_signals(vec![signal]),
            ChannelUpdate::Opened(peer) => self.on_channel_open(peer, ctx),
            ChannelUpdate::Message { from, text } => self.on_peer_text(&from, &text, ctx),
            ChannelUpdate::Closed(peer) => {
                if self.net.as_ref().and_then(|n| n.peer_id.as_deref()) == Some(peer.as_str()) {
                    self.message = "Opponent disconnected".to_string();
                }
            }
            ChannelUpdate::Failed { peer, reason } => {
                warn!("Channel to {} failed: {}", peer, reason);
                self.message = format!("Connection failed: {}", reason);
            }
        }
    }

    fn on_channel_open(&mut self, peer: String, ctx: &mut Context<Self>) {
        let net = match self.net.as_mut() {
            Some(net) => net,
            None => return,
        };
        if net.peer_id.is_none() {
            net.peer_id = Some(peer.clone());
        }
        if net.peer_id.as_deref() != Some(peer.as_str()) {
            debug!("Ignoring extra channel from {}", peer);
            return;
        }

        match net.role {
            NetRole::Host => {
                let time_control_id = net.time_control_id.clone();
                let start = GameMessage::Start {
                    assigned_color: Color::Black,
                    time_control_id: time_control_id.clone(),
                };
                if let Err(e) = net.peers.send_to(&peer, &encode_payload(&start)) {
                    warn!("Could not start the game with {}: {}", peer, e);
                    self.message = format!("Connection failed: {}", e);
                    return;
                }
                self.message.clear();
                self.challenges.clear();
                self.net_screen = NetScreen::None;
                self.start_game(GameMode::Network, Color::White, &time_control_id, ctx);
            }
            NetRole::Guest => {
                self.message = "Connected! Waiting for host to start...".to_string();
            }
        }
    }

    fn on_peer_text(&mut self, from: &str, text: &str, ctx: &mut Context<Self>) {
        let role = match &self.net {
            Some(net) if net.peer_id.as_deref() == Some(from) => net.role,
            _ => {
                debug!("Ignoring message from {}", from);
                return;
            }
        };
        let msg = match parse_game_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping peer message: {}", e);
                return;
            }
        };

        match apply_peer_message(&mut self.session, msg, Instant::now()) {
            Ok(SyncOutcome::Start {
                assigned_color,
                time_control_id,
            }) => {
                if role != NetRole::Guest {
                    warn!("Ignoring start from guest {}", from);
                    return;
                }
                self.message.clear();
                self.challenges.clear();
                self.net_screen = NetScreen::None;
                self.start_game(GameMode::Network, assigned_color, &time_control_id, ctx);
            }
            Ok(SyncOutcome::Moved(applied)) => {
                debug!("Opponent played {}", applied.uci);
                self.clear_selection();
                if !self.session.is_live() {
                    self.on_game_over();
                }
            }
            Ok(SyncOutcome::Resigned(_)) => {
                self.message = "Opponent resigned".to_string();
                self.on_game_over();
            }
            Ok(SyncOutcome::FlaggedOut(_)) => {
                self.message = "Opponent flagged on time".to_string();
                self.on_game_over();
            }
            Ok(SyncOutcome::Ignored) => {}
            Err(e) => warn!("Rejected peer message: {}", e),
        }
    }
}

impl Handler<RelayEvent> for SessionController {
    type Result = ();

    fn handle(&mut self, msg: RelayEvent, _: &mut Context<Self>) {
        if self.presence_link_is(msg.link) {
            self.on_presence_event(msg.event);
        } else if self.game_link_is(msg.link) {
            self.on_game_relay_event(msg.event);
        } else {
            debug!("Dropping event from stale relay link {}", msg.link);
        }
    }
}

impl Handler<LinkedPeerEvent> for SessionController {
    type Result = ();

    fn handle(&mut self, msg: LinkedPeerEvent, ctx: &mut Context<Self>) {
        let update = match self.net.as_mut() {
            Some(net) if net.link == msg.link => net.peers.on_channel_event(msg.event),
            _ => return,
        };
        self.on_channel_update(update, ctx);
    }
}

impl Handler<ConnectPresence> for SessionController {
    type Result = ResponseActFuture<Self, Result<(), ConnectionError>>;

    fn handle(&mut self, msg: ConnectPresence, ctx: &mut Context<Self>) -> Self::Result {
        let name = clean_player_name(&msg.name);
        if name.is_empty() {
            return Box::pin(fut::ready(Err(ConnectionError::MissingName)));
        }
        self.player_name = name.clone();

        if let Some(presence) = self.presence.as_mut() {
            if presence.welcomed {
                if let Some(meta) = presence.meta.as_object_mut() {
                    meta.insert("name".to_string(), json!(name));
                }
                presence.client.do_send(SendRelay(meta_patch("name", json!(name))));
                return Box::pin(fut::ready(Ok(())));
            }
        }
        self.disconnect_presence();

        let status = if self.session.mode() == Some(GameMode::Network) && self.session.is_live() {
            PresenceStatus::Playing
        } else {
            PresenceStatus::Lobby
        };
        let meta = presence_meta(&name, status);
        let link = self.next_id();
        let config = RendezvousConfig {
            url: self.settings.signal_url.clone(),
            app: PRESENCE_APP.to_string(),
            room: PRESENCE_ROOM.to_string(),
            meta: meta.clone(),
        };
        let (client, welcome) = RendezvousClient::connect(link, config, ctx.address().recipient());
        info!("Connecting to the lobby as {}", name);
        self.presence = Some(PresenceLink {
            link,
            client,
            welcomed: false,
            local_id: None,
            meta,
            peer_meta: Default::default(),
        });

        Box::pin(welcome.into_actor(self).map(move |res, act, _| {
            let result = welcome_result(res);
            if !act.presence_link_is(link) {
                return Err(ConnectionError::Superseded);
            }
            match result {
                Ok(_) => Ok(()),
                Err(e) => {
                    act.presence = None;
                    act.message = format!("Could not connect online lobby: {}", e);
                    Err(e)
                }
            }
        }))
    }
}

impl Handler<HostGame> for SessionController {
    type Result = ResponseActFuture<Self, Result<String, ConnectionError>>;

    fn handle(&mut self, msg: HostGame, ctx: &mut Context<Self>) -> Self::Result {
        let code = msg
            .room_code
            .as_deref()
            .map(normalize_room_code)
            .filter(|code| !code.is_empty())
            .unwrap_or_else(gen_room_code);
        self.message.clear();
        let (link, welcome) = self.open_game_link(NetRole::Host, &code, &msg.time_control_id, ctx);

        Box::pin(welcome.into_actor(self).map(move |res, act, _| match welcome_result(res) {
            Ok(_) => Ok(code),
            Err(e) => {
                act.game_link_failed(link, &e);
                Err(e)
            }
        }))
    }
}

impl Handler<JoinGame> for SessionController {
    type Result = ResponseActFuture<Self, Result<(), ConnectionError>>;

    fn handle(&mut self, msg: JoinGame, ctx: &mut Context<Self>) -> Self::Result {
        let code = normalize_room_code(&msg.room_code);
        if code.is_empty() {
            return Box::pin(fut::ready(Err(ConnectionError::MissingRoomCode)));
        }
        self.message.clear();
        let time_control_id = self.session.time_control().id.to_string();
        let (link, welcome) = self.open_game_link(NetRole::Guest, &code, &time_control_id, ctx);

        Box::pin(welcome.into_actor(self).map(move |res, act, _| match welcome_result(res) {
            Ok(_) => Ok(()),
            Err(e) => {
                act.game_link_failed(link, &e);
                Err(e)
            }
        }))
    }
}

impl Handler<ChallengePlayer> for SessionController {
    type Result = ResponseActFuture<Self, Result<String, ChallengeRefused>>;

    fn handle(&mut self, msg: ChallengePlayer, ctx: &mut Context<Self>) -> Self::Result {
        if !self.presence.as_ref().map_or(false, |p| p.welcomed) {
            return Box::pin(fut::ready(Err(ChallengeRefused::NotConnected)));
        }
        let roster = self.roster();
        let in_game = self.session.mode() == Some(GameMode::Network) && self.session.is_live();
        let target = match check_challenge_target(&roster, &msg.peer_id, in_game) {
            Ok(target) => target.clone(),
            Err(e) => return Box::pin(fut::ready(Err(e))),
        };

        let code = gen_room_code();
        let time_control_id = resolve_time_control(&msg.time_control_id).id.to_string();
        self.challenges.incoming = None;
        let (link, welcome) = self.open_game_link(NetRole::Host, &code, &time_control_id, ctx);

        Box::pin(welcome.into_actor(self).map(move |res, act, _| match welcome_result(res) {
            Ok(_) => {
                if !act.game_link_is(link) {
                    return Err(ChallengeRefused::Connection(ConnectionError::Superseded));
                }
                act.send_lobby(
                    &target.id,
                    &LobbyMessage::Challenge {
                        room_code: code.clone(),
                        time_control_id: time_control_id.clone(),
                        from_name: act.player_name.clone(),
                    },
                );
                act.challenges.begin_outgoing(Challenge {
                    counterparty_id: target.id.clone(),
                    counterparty_name: target.name.clone(),
                    room_code: code.clone(),
                    time_control_id,
                });
                act.message = format!("Challenge sent to {}...", target.name);
                Ok(code)
            }
            Err(e) => {
                act.game_link_failed(link, &e);
                Err(ChallengeRefused::Connection(e))
            }
        }))
    }
}

impl Handler<AcceptChallenge> for SessionController {
    type Result = ResponseActFuture<Self, Result<bool, ConnectionError>>;

    fn handle(&mut self, _: AcceptChallenge, ctx: &mut Context<Self>) -> Self::Result {
        let challenge = match self.challenges.take_incoming() {
            Some(challenge) => challenge,
            None => return Box::pin(fut::ready(Ok(false))),
        };
        info!("Accepting challenge from {}", challenge.counterparty_name);
        self.send_lobby(
            &challenge.counterparty_id,
            &LobbyMessage::ChallengeAccepted {
                room_code: challenge.room_code.clone(),
                time_control_id: challenge.time_control_id.clone(),
                by_name: self.player_name.clone(),
            },
        );
        self.message.clear();
        let (link, welcome) =
            self.open_game_link(NetRole::Guest, &challenge.room_code, &challenge.time_control_id, ctx);

        Box::pin(welcome.into_actor(self).map(move |res, act, _| match welcome_result(res) {
            Ok(_) => Ok(true),
            Err(e) => {
                act.game_link_failed(link, &e);
                Err(e)
            }
        }))
    }
}

impl Handler<DeclineChallenge> for SessionController {
    type Result = ();

    fn handle(&mut self, _: DeclineChallenge, _: &mut Context<Self>) {
        if let Some(challenge) = self.challenges.take_incoming() {
            info!("Declining challenge from {}", challenge.counterparty_name);
            self.send_lobby(
                &challenge.counterparty_id,
                &LobbyMessage::ChallengeDeclined {
                    room_code: challenge.room_code,
                    by_name: self.player_name.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::GetSnapshot;
    use crate::models::config::Settings;

    #[test]
    fn room_codes_are_normalized() {
        assert_eq!(normalize_room_code("  abc123 "), "ABC123");
        assert_eq!(normalize_room_code("   "), "");
    }

    #[actix_rt::test]
    async fn presence_needs_a_name() {
        let addr = SessionController::new(Settings::default()).start();
        let result = addr.send(ConnectPresence { name: "   ".to_string() }).await.unwrap();
        assert_eq!(result, Err(ConnectionError::MissingName));
    }

    #[actix_rt::test]
    async fn join_needs_a_room_code() {
        let addr = SessionController::new(Settings::default()).start();
        let result = addr.send(JoinGame { room_code: " ".to_string() }).await.unwrap();
        assert_eq!(result, Err(ConnectionError::MissingRoomCode));
        assert_eq!(addr.send(GetSnapshot).await.unwrap().net_screen, NetScreen::None);
    }

    #[actix_rt::test]
    async fn challenges_need_the_lobby() {
        let addr = SessionController::new(Settings::default()).start();
        let result = addr
            .send(ChallengePlayer {
                peer_id: "p1".to_string(),
                time_control_id: "blitz".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result, Err(ChallengeRefused::NotConnected));
        assert_eq!(addr.send(AcceptChallenge).await.unwrap(), Ok(false));
    }

    #[actix_rt::test]
    async fn unreachable_relay_returns_to_the_lobby() {
        let settings = Settings {
            signal_url: "ws://127.0.0.1:1/ws".to_string(),
            ..Settings::default()
        };
        let addr = SessionController::new(settings).start();
        let result = addr
            .send(HostGame {
                time_control_id: "casual".to_string(),
                room_code: Some("abc123".to_string()),
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::Socket(_))));

        let snapshot = addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.net_screen, NetScreen::Lobby);
        assert_eq!(snapshot.room_code, None);
        assert!(snapshot.message.starts_with("Could not reach signaling server"));
    }
}
