//! The session controller actor.
//!
//! One `SessionController` owns the game session and every resource around
//! it: the engine, the lobby connection, the game room connection and its
//! peer channels. A UI sends commands and reads [`Snapshot`]s.

pub mod game_handlers;
pub mod net_handlers;

use actix::prelude::*;
use actix::MessageResponse;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::UciEngine;
use crate::error::{ChallengeRefused, ConnectionError, MoveRejected};
use crate::game::{Color, DrawReason, GameStatus, Grid, Move, OpeningLabel, Piece, Square};
use crate::models::config::{format_clock, resolve_ai_level, AiLevel, Settings, DEFAULT_SEARCH_DEPTH};
use crate::models::{AppliedMove, GameMode, GameSession, MoveRequest};
use crate::net::{
    build_roster, Challenge, ChallengeState, DirectBackend, OnlinePlayer, PeerEvent, PeerLink, RendezvousClient,
};

/// Clock refresh interval
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Delay before the engine opens when the player takes Black
pub const AI_OPENING_DELAY: Duration = Duration::from_millis(600);

/// Which network screen the player is on
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetScreen {
    None,
    Lobby,
    Waiting,
    Joining,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetRole {
    Host,
    Guest,
}

pub(crate) enum EngineState {
    Stopped,
    Launching { generation: u64 },
    Ready(Addr<UciEngine>),
    Unavailable,
}

/// Lobby connection and the relay's view of it
pub(crate) struct PresenceLink {
    pub link: u64,
    pub client: Addr<RendezvousClient>,
    pub welcomed: bool,
    pub local_id: Option<String>,
    pub meta: Value,
    pub peer_meta: BTreeMap<String, Value>,
}

/// Game room connection with its peer channels
pub(crate) struct GameLink {
    pub link: u64,
    pub client: Addr<RendezvousClient>,
    pub peers: PeerLink<DirectBackend>,
    pub role: NetRole,
    pub room_code: String,
    pub time_control_id: String,
    pub peer_id: Option<String>,
}

/// Peer channel event tagged with the game link it belongs to
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct LinkedPeerEvent {
    pub link: u64,
    pub event: PeerEvent,
}

pub struct SessionController {
    settings: Settings,
    session: GameSession,
    selected: Option<Square>,
    legal_targets: Vec<Move>,
    ai_level: &'static AiLevel,
    search_depth: u32,
    think_token: u64,
    ai_thinking: bool,
    pending_think: Option<u64>,
    engine: EngineState,
    player_name: String,
    presence: Option<PresenceLink>,
    challenges: ChallengeState,
    net: Option<GameLink>,
    net_screen: NetScreen,
    next_id: u64,
    message: String,
}

impl SessionController {
    pub fn new(settings: Settings) -> Self {
        SessionController {
            settings,
            session: GameSession::idle(),
            selected: None,
            legal_targets: Vec::new(),
            ai_level: resolve_ai_level("pathetic"),
            search_depth: DEFAULT_SEARCH_DEPTH,
            think_token: 0,
            ai_thinking: false,
            pending_think: None,
            engine: EngineState::Stopped,
            player_name: String::new(),
            presence: None,
            challenges: ChallengeState::default(),
            net: None,
            net_screen: NetScreen::None,
            next_id: 1,
            message: String::new(),
        }
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn clear_selection(&mut self) {
        self.selected = None;
        self.legal_targets.clear();
    }

    fn roster(&self) -> Vec<OnlinePlayer> {
        match &self.presence {
            Some(presence) if presence.welcomed => {
                build_roster(presence.local_id.as_deref(), &presence.meta, &presence.peer_meta)
            }
            _ => Vec::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let session = &self.session;
        Snapshot {
            board: session.position().board,
            selected: self.selected.map(Square::coords),
            legal_targets: self.legal_targets.iter().map(|mv| mv.to.coords()).collect(),
            turn: session.turn(),
            status: session.status(),
            draw_reason: session.draw_reason(),
            winner: session.winner(),
            mode: session.mode(),
            player_color: session.player_color(),
            time_control_id: session.time_control().id.to_string(),
            white_clock: format_clock(session.clock(Color::White)),
            black_clock: format_clock(session.clock(Color::Black)),
            captured_by_white: session.captured_by(Color::White).to_vec(),
            captured_by_black: session.captured_by(Color::Black).to_vec(),
            history: session.history().to_vec(),
            opening: session.opening().clone(),
            fen: session.fen(),
            status_line: session.status_line(),
            ai_level: self.ai_level.id.to_string(),
            ai_thinking: self.ai_thinking,
            message: self.message.clone(),
            net_screen: self.net_screen,
            net_role: self.net.as_ref().map(|net| net.role),
            room_code: self.net.as_ref().map(|net| net.room_code.clone()),
            presence_online: self.presence.as_ref().map_or(false, |p| p.welcomed),
            player_name: self.player_name.clone(),
            players: self.roster(),
            incoming_challenge: self.challenges.incoming.clone(),
            outgoing_challenge: self.challenges.outgoing.clone(),
        }
    }

    /// Stop everything in teardown order: timers, searches, channels, sockets
    fn teardown(&mut self, ctx: &mut Context<Self>) {
        self.think_token += 1;
        self.ai_thinking = false;
        self.shutdown_engine();
        self.disconnect_net();
        self.disconnect_presence();
        ctx.stop();
    }
}

impl Actor for SessionController {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Session controller started");
        ctx.run_interval(TICK_INTERVAL, |act, ctx| act.on_clock_tick(ctx));
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        debug!("Session controller stopped");
    }
}

/// Read model handed to the UI
#[derive(MessageResponse, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub board: Grid,
    pub selected: Option<[i32; 2]>,
    pub legal_targets: Vec<[i32; 2]>,
    pub turn: Color,
    pub status: GameStatus,
    pub draw_reason: Option<DrawReason>,
    pub winner: Option<Color>,
    pub mode: Option<GameMode>,
    pub player_color: Color,
    pub time_control_id: String,
    pub white_clock: String,
    pub black_clock: String,
    pub captured_by_white: Vec<Piece>,
    pub captured_by_black: Vec<Piece>,
    pub history: Vec<String>,
    pub opening: OpeningLabel,
    pub fen: String,
    pub status_line: String,
    pub ai_level: String,
    pub ai_thinking: bool,
    pub message: String,
    pub net_screen: NetScreen,
    pub net_role: Option<NetRole>,
    pub room_code: Option<String>,
    pub presence_online: bool,
    pub player_name: String,
    pub players: Vec<OnlinePlayer>,
    pub incoming_challenge: Option<Challenge>,
    pub outgoing_challenge: Option<Challenge>,
}

/// What a board click did
#[derive(MessageResponse, Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Ignored,
    Selected(usize),
    Deselected,
    Moved(String),
    Rejected(MoveRejected),
}

/// Start a local, AI or network game
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct StartGame {
    pub mode: GameMode,
    pub color: Color,
    pub time_control_id: String,
    pub ai_level: Option<String>,
    pub search_depth: Option<i64>,
}

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "ClickOutcome")]
pub struct ClickSquare {
    pub row: i32,
    pub col: i32,
}

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Result<AppliedMove, MoveRejected>")]
pub struct SubmitMove(pub MoveRequest);

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct Resign;

/// Abandon the current game and any room connection
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct LeaveGame;

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), ConnectionError>")]
pub struct ConnectPresence {
    pub name: String,
}

/// Open a game room and wait for an opponent. Resolves with the room code.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<String, ConnectionError>")]
pub struct HostGame {
    pub time_control_id: String,
    pub room_code: Option<String>,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), ConnectionError>")]
pub struct JoinGame {
    pub room_code: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<String, ChallengeRefused>")]
pub struct ChallengePlayer {
    pub peer_id: String,
    pub time_control_id: String,
}

/// Resolves with `false` when there was no challenge to accept
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Result<bool, ConnectionError>")]
pub struct AcceptChallenge;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct DeclineChallenge;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Snapshot")]
pub struct GetSnapshot;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<GetSnapshot> for SessionController {
    type Result = Snapshot;

    fn handle(&mut self, _: GetSnapshot, _: &mut Context<Self>) -> Snapshot {
        self.snapshot()
    }
}

impl Handler<Shutdown> for SessionController {
    type Result = ();

    fn handle(&mut self, _: Shutdown, ctx: &mut Context<Self>) {
        info!("Shutting down session controller");
        self.teardown(ctx);
    }
}
