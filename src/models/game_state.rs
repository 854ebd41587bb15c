use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::MoveRejected;
use crate::game::{
    apply_move, describe_opening, evaluate_status, legal_moves, move_to_uci, position_key,
    to_fen, CastleSide, Color, DrawReason, GameStatus, Move, OpeningLabel, Piece, PieceKind,
    Position, Square,
};
use crate::models::config::{resolve_time_control, TimeControl};

/// Who the local player is facing
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    /// Two players on one board
    #[serde(rename = "pvp")]
    Local,
    /// Against the automated opponent
    #[serde(rename = "pvai")]
    Ai,
    /// Against a remote peer
    #[serde(rename = "net")]
    Network,
}

/// A move as requested by a click, the wire or the search engine
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub from: [i32; 2],
    pub to: [i32; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<CastleSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

impl MoveRequest {
    pub fn new(from: [i32; 2], to: [i32; 2]) -> Self {
        MoveRequest {
            from,
            to,
            marker: None,
            promotion: None,
        }
    }
}

impl From<Move> for MoveRequest {
    fn from(mv: Move) -> Self {
        MoveRequest {
            from: mv.from.coords(),
            to: mv.to.coords(),
            marker: mv.marker,
            promotion: mv.promotion,
        }
    }
}

/// Result of a successful `make_move`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub mv: Move,
    pub mover: Color,
    pub uci: String,
    pub captured: Option<Piece>,
    pub status: GameStatus,
}

/// What a clock tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to do: untimed, not live or no time elapsed
    Idle,
    /// The side to move lost some time
    Running,
    /// The side to move ran out of time
    Flagged(Color),
}

/// Authoritative state of one game from the local player's view
#[derive(Debug, Clone)]
pub struct GameSession {
    position: Position,
    status: GameStatus,
    draw_reason: Option<DrawReason>,
    mode: Option<GameMode>,
    player_color: Color,
    time_control: &'static TimeControl,
    clocks: [Option<Duration>; 2],
    increment: Duration,
    last_tick: Option<Instant>,
    history: Vec<String>,
    halfmove_clock: u32,
    fullmove_number: u32,
    captured: [Vec<Piece>; 2],
    position_counts: HashMap<String, u32>,
    opening: OpeningLabel,
    loser: Option<Color>,
}

impl Default for GameSession {
    fn default() -> Self {
        GameSession::idle()
    }
}

impl GameSession {
    /// A session with no game started
    pub fn idle() -> Self {
        GameSession {
            position: Position::initial(),
            status: GameStatus::Idle,
            draw_reason: None,
            mode: None,
            player_color: Color::White,
            time_control: resolve_time_control("casual"),
            clocks: [None, None],
            increment: Duration::ZERO,
            last_tick: None,
            history: Vec::new(),
            halfmove_clock: 0,
            fullmove_number: 1,
            captured: [Vec::new(), Vec::new()],
            position_counts: HashMap::new(),
            opening: OpeningLabel::default(),
            loser: None,
        }
    }

    /// Start a fresh game
    pub fn start(mode: GameMode, player_color: Color, time_control_id: &str, now: Instant) -> Self {
        let time_control = resolve_time_control(time_control_id);
        let initial = time_control.initial();
        let position = Position::initial();

        let mut position_counts = HashMap::new();
        position_counts.insert(position_key(&position), 1);

        info!(
            "Starting {:?} game as {} with time control {}",
            mode,
            player_color.label(),
            time_control.id
        );

        GameSession {
            position,
            status: GameStatus::Playing,
            draw_reason: None,
            mode: Some(mode),
            player_color,
            time_control,
            clocks: [initial, initial],
            increment: time_control.increment(),
            last_tick: initial.map(|_| now),
            history: Vec::new(),
            halfmove_clock: 0,
            fullmove_number: 1,
            captured: [Vec::new(), Vec::new()],
            position_counts,
            opening: describe_opening::<String>(&[]),
            loser: None,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn turn(&self) -> Color {
        self.position.turn
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn draw_reason(&self) -> Option<DrawReason> {
        self.draw_reason
    }

    pub fn mode(&self) -> Option<GameMode> {
        self.mode
    }

    pub fn player_color(&self) -> Color {
        self.player_color
    }

    pub fn time_control(&self) -> &'static TimeControl {
        self.time_control
    }

    pub fn clock(&self, color: Color) -> Option<Duration> {
        self.clocks[color.index()]
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Pieces taken by `color`
    pub fn captured_by(&self, color: Color) -> &[Piece] {
        &self.captured[color.index()]
    }

    pub fn opening(&self) -> &OpeningLabel {
        &self.opening
    }

    /// Side that resigned or flagged
    pub fn loser(&self) -> Option<Color> {
        self.loser
    }

    pub fn winner(&self) -> Option<Color> {
        match self.status {
            GameStatus::Checkmate => Some(self.position.turn.opponent()),
            GameStatus::Resigned | GameStatus::Timeout => self.loser.map(Color::opponent),
            _ => None,
        }
    }

    pub fn fen(&self) -> String {
        to_fen(&self.position, self.halfmove_clock, self.fullmove_number)
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Whether the local player may act on the board now
    pub fn is_local_turn(&self) -> bool {
        match self.mode {
            Some(GameMode::Local) => true,
            Some(GameMode::Ai) | Some(GameMode::Network) => self.position.turn == self.player_color,
            None => false,
        }
    }

    /// Legal moves of the piece on `square`
    pub fn legal_moves_from(&self, square: Square) -> Vec<Move> {
        legal_moves(&self.position, square)
    }

    /// Run the clock of the side to move up to `now`
    pub fn tick(&mut self, now: Instant) -> Tick {
        if !self.status.is_live() {
            return Tick::Idle;
        }
        let last = match self.last_tick {
            Some(last) => last,
            None => {
                if self.time_control.initial_ms.is_some() {
                    self.last_tick = Some(now);
                }
                return Tick::Idle;
            }
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed.is_zero() {
            return Tick::Idle;
        }

        let active = self.position.turn;
        self.last_tick = Some(now);
        let remaining = match self.clocks[active.index()] {
            Some(remaining) => remaining,
            None => return Tick::Idle,
        };

        let next = remaining.saturating_sub(elapsed);
        self.clocks[active.index()] = Some(next);
        if next.is_zero() {
            self.flag_timeout(Some(active));
            return Tick::Flagged(active);
        }
        Tick::Running
    }

    /// Validate and apply a move. Every move source goes through here.
    pub fn make_move(&mut self, request: MoveRequest, now: Instant) -> Result<AppliedMove, MoveRejected> {
        // Flag-fall takes precedence over the move
        self.tick(now);

        match self.status {
            GameStatus::Idle => return Err(MoveRejected::NotStarted),
            status if status.is_terminal() => return Err(MoveRejected::GameOver),
            _ => {}
        }

        let from = Square::from_coords(request.from[0], request.from[1])
            .ok_or(MoveRejected::OutOfRange(request.from[0], request.from[1]))?;
        let to = Square::from_coords(request.to[0], request.to[1])
            .ok_or(MoveRejected::OutOfRange(request.to[0], request.to[1]))?;

        let piece = self
            .position
            .piece_at(from)
            .ok_or_else(|| MoveRejected::NoPiece(from.to_string()))?;
        if piece.color != self.position.turn {
            return Err(MoveRejected::WrongTurn(from.to_string()));
        }

        let legal = legal_moves(&self.position, from)
            .into_iter()
            .find(|mv| mv.to == to && mv.marker == request.marker)
            .ok_or_else(|| MoveRejected::Illegal(format!("{}{}", from, to)))?;

        let mv = Move {
            promotion: legal.promotion.map(|default| {
                request
                    .promotion
                    .filter(|kind| kind.is_promotion_target())
                    .unwrap_or(default)
            }),
            ..legal
        };

        // Record captures, including the en-passant victim
        let en_passant_victim = if piece.kind == PieceKind::Pawn && self.position.en_passant == Some(to) {
            Square::new(from.row(), to.col()).and_then(|sq| self.position.piece_at(sq))
        } else {
            None
        };
        let captured = self.position.piece_at(to).or(en_passant_victim);
        if let Some(victim) = captured {
            self.captured[piece.color.index()].push(victim);
        }

        self.position = apply_move(&self.position, &mv);

        if piece.kind == PieceKind::Pawn || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }
        if piece.color == Color::Black {
            self.fullmove_number += 1;
        }

        let uci = move_to_uci(&mv);
        self.history.push(uci.clone());
        *self
            .position_counts
            .entry(position_key(&self.position))
            .or_insert(0) += 1;

        let report = evaluate_status(&self.position, self.halfmove_clock, &self.position_counts);
        self.status = report.status;
        self.draw_reason = report.draw_reason;

        if self.time_control.initial_ms.is_some() {
            if let Some(clock) = self.clocks[piece.color.index()].as_mut() {
                *clock += self.increment;
            }
            self.last_tick = if self.status.is_live() { Some(now) } else { None };
        }

        self.opening = describe_opening(&self.history);

        debug!("Applied {} for {}, status {:?}", uci, piece.color.label(), self.status);

        Ok(AppliedMove {
            mv,
            mover: piece.color,
            uci,
            captured,
            status: self.status,
        })
    }

    /// End the game by resignation. Returns the resigning side, or `None` if
    /// there was no live game.
    pub fn resign(&mut self, color: Option<Color>) -> Option<Color> {
        self.force_end(GameStatus::Resigned, color)
    }

    /// End the game on time. Returns the flagged side, or `None` if there was
    /// no live game.
    pub fn flag_timeout(&mut self, color: Option<Color>) -> Option<Color> {
        let flagged = self.force_end(GameStatus::Timeout, color)?;
        if let Some(clock) = self.clocks[flagged.index()].as_mut() {
            *clock = Duration::ZERO;
        }
        Some(flagged)
    }

    fn force_end(&mut self, status: GameStatus, color: Option<Color>) -> Option<Color> {
        if self.mode.is_none() || self.status == GameStatus::Idle || self.status.is_terminal() {
            return None;
        }
        let color = color.unwrap_or(self.position.turn);
        self.status = status;
        self.draw_reason = None;
        self.loser = Some(color);
        self.last_tick = None;
        info!("{} lost by {:?}", color.label(), status);
        Some(color)
    }

    /// Human-readable status for the board header
    pub fn status_line(&self) -> String {
        let turn = self.position.turn;
        match self.status {
            GameStatus::Idle => String::new(),
            GameStatus::Checkmate => format!("Checkmate. {} wins!", turn.opponent().label()),
            GameStatus::Stalemate => "Stalemate. Draw".to_string(),
            GameStatus::Draw => match self.draw_reason {
                Some(reason) => format!("Draw. {}", reason.label()),
                None => "Draw".to_string(),
            },
            GameStatus::Resigned | GameStatus::Timeout => {
                let loser = self.loser.unwrap_or(turn);
                let verb = if self.status == GameStatus::Resigned {
                    "resigned"
                } else {
                    "flagged"
                };
                format!("{} {}. {} wins!", loser.label(), verb, loser.opponent().label())
            }
            GameStatus::Check => format!("{} is in check!", turn.label()),
            GameStatus::Playing => {
                if self.mode == Some(GameMode::Network) {
                    if turn == self.player_color {
                        "Your turn".to_string()
                    } else {
                        "Opponent's turn".to_string()
                    }
                } else {
                    format!("{}'s turn", turn.label())
                }
            }
        }
    }
}
