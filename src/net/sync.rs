//! Game traffic between two peers and the lobby challenge exchange.

use log::{debug, info, warn};
use serde::Serialize;
use std::time::Instant;

use crate::error::ProtocolViolation;
use crate::game::Color;
use crate::models::config::{resolve_time_control, sanitize_player_name};
use crate::models::{AppliedMove, GameMessage, GameMode, GameSession, LobbyMessage, MoveRequest};

/// What a peer message did to the local session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The host asked for a fresh game; the caller starts it
    Start {
        assigned_color: Color,
        time_control_id: String,
    },
    Moved(AppliedMove),
    Resigned(Color),
    FlaggedOut(Color),
    /// Valid but had no effect, e.g. a resign after the game ended
    Ignored,
}

pub fn parse_game_message(text: &str) -> Result<GameMessage, ProtocolViolation> {
    Ok(serde_json::from_str(text)?)
}

/// Apply a message received on the peer channel.
///
/// Moves go through `make_move` and only while it is the peer's turn. Resign
/// and timeout are trusted as sent.
pub fn apply_peer_message(
    session: &mut GameSession,
    msg: GameMessage,
    now: Instant,
) -> Result<SyncOutcome, ProtocolViolation> {
    if let GameMessage::Start {
        assigned_color,
        time_control_id,
    } = msg
    {
        return Ok(SyncOutcome::Start {
            assigned_color,
            time_control_id: resolve_time_control(&time_control_id).id.to_string(),
        });
    }

    if session.mode() != Some(GameMode::Network) {
        return Err(ProtocolViolation::NotInGame);
    }

    match msg {
        GameMessage::Move {
            from,
            to,
            marker,
            promotion,
        } => {
            if session.turn() == session.player_color() {
                return Err(ProtocolViolation::OutOfTurn(format!(
                    "move {:?}->{:?} on our turn",
                    from, to
                )));
            }
            let request = MoveRequest {
                from,
                to,
                marker,
                promotion,
            };
            let applied = session.make_move(request, now)?;
            debug!("Applied peer move {}", applied.uci);
            Ok(SyncOutcome::Moved(applied))
        }
        GameMessage::Resign { color } => Ok(session
            .resign(Some(color))
            .map_or(SyncOutcome::Ignored, SyncOutcome::Resigned)),
        GameMessage::Timeout { color } => Ok(session
            .flag_timeout(Some(color))
            .map_or(SyncOutcome::Ignored, SyncOutcome::FlaggedOut)),
        GameMessage::Start { .. } => Ok(SyncOutcome::Ignored),
    }
}

/// The wire form of a locally applied move
pub fn move_message(applied: &AppliedMove) -> GameMessage {
    let request = MoveRequest::from(applied.mv);
    GameMessage::Move {
        from: request.from,
        to: request.to,
        marker: request.marker,
        promotion: request.promotion,
    }
}

/// An offer to play, from either side's point of view
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub counterparty_id: String,
    pub counterparty_name: String,
    pub room_code: String,
    pub time_control_id: String,
}

/// What the controller has to do about a lobby message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyAction {
    /// Show the challenge to the player
    Incoming(Challenge),
    /// Send `reply` back to `to` without bothering the player
    AutoDecline { to: String, reply: LobbyMessage },
    /// Our challenge was accepted; keep waiting for the channel
    Accepted { by_name: String },
    /// Our challenge was declined; drop the hosted room
    Declined { by_name: String },
    Ignored,
}

/// At most one challenge in each direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeState {
    pub incoming: Option<Challenge>,
    pub outgoing: Option<Challenge>,
}

impl ChallengeState {
    pub fn clear(&mut self) {
        self.incoming = None;
        self.outgoing = None;
    }

    pub fn begin_outgoing(&mut self, challenge: Challenge) {
        info!(
            "Challenging {} in room {}",
            challenge.counterparty_name, challenge.room_code
        );
        self.outgoing = Some(challenge);
    }

    pub fn take_incoming(&mut self) -> Option<Challenge> {
        self.incoming.take()
    }

    /// Handle a `direct` payload from the lobby. `busy` is true while in a
    /// network game or while hosting/joining one.
    pub fn on_lobby_message(&mut self, from: &str, msg: LobbyMessage, busy: bool, my_name: &str) -> LobbyAction {
        match msg {
            LobbyMessage::Challenge {
                room_code,
                time_control_id,
                from_name,
            } => {
                let room_code = room_code.trim().to_uppercase();
                if room_code.is_empty() {
                    warn!("Challenge from {} without a room code", from);
                    return LobbyAction::Ignored;
                }
                if busy {
                    info!("Auto-declining challenge from {}", from);
                    return LobbyAction::AutoDecline {
                        to: from.to_string(),
                        reply: LobbyMessage::ChallengeDeclined {
                            room_code,
                            by_name: sanitize_player_name(my_name),
                        },
                    };
                }
                let challenge = Challenge {
                    counterparty_id: from.to_string(),
                    counterparty_name: sanitize_player_name(&from_name),
                    room_code,
                    time_control_id: resolve_time_control(&time_control_id).id.to_string(),
                };
                self.incoming = Some(challenge.clone());
                LobbyAction::Incoming(challenge)
            }
            LobbyMessage::ChallengeAccepted { by_name, .. } => {
                self.outgoing = None;
                LobbyAction::Accepted {
                    by_name: named_or_opponent(&by_name),
                }
            }
            LobbyMessage::ChallengeDeclined { by_name, .. } => {
                self.outgoing = None;
                LobbyAction::Declined {
                    by_name: named_or_opponent(&by_name),
                }
            }
        }
    }

    /// Forget an incoming challenge whose sender went offline
    pub fn on_peer_left(&mut self, id: &str) -> bool {
        let gone = self
            .incoming
            .as_ref()
            .map_or(false, |c| c.counterparty_id == id);
        if gone {
            self.incoming = None;
        }
        gone
    }
}

fn named_or_opponent(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        "Opponent".to_string()
    } else {
        name.to_string()
    }
}
