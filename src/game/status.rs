use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::board::{PieceKind, Position};
use super::movegen::{all_legal_moves, is_in_check};
use super::notation::position_key;

/// Game status as seen by the session state machine
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Idle,
    Playing,
    Check,
    Checkmate,
    Stalemate,
    Draw,
    Resigned,
    Timeout,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GameStatus::Checkmate
                | GameStatus::Stalemate
                | GameStatus::Draw
                | GameStatus::Resigned
                | GameStatus::Timeout
        )
    }

    /// Whether moves and clock ticks are accepted
    pub fn is_live(self) -> bool {
        matches!(self, GameStatus::Playing | GameStatus::Check)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DrawReason {
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

impl DrawReason {
    pub fn label(self) -> &'static str {
        match self {
            DrawReason::InsufficientMaterial => "Insufficient material",
            DrawReason::FiftyMoveRule => "50-move rule",
            DrawReason::ThreefoldRepetition => "Threefold repetition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub status: GameStatus,
    pub draw_reason: Option<DrawReason>,
}

impl StatusReport {
    fn plain(status: GameStatus) -> Self {
        StatusReport {
            status,
            draw_reason: None,
        }
    }

    fn draw(reason: DrawReason) -> Self {
        StatusReport {
            status: GameStatus::Draw,
            draw_reason: Some(reason),
        }
    }
}

/// Classify the position for the side to move.
///
/// Checks run in a fixed order: no legal move, insufficient material, the
/// fifty-move rule, threefold repetition, then check.
pub fn evaluate_status(
    position: &Position,
    halfmove_clock: u32,
    position_counts: &HashMap<String, u32>,
) -> StatusReport {
    let turn = position.turn;
    if all_legal_moves(position, turn).is_empty() {
        return if is_in_check(position, turn) {
            StatusReport::plain(GameStatus::Checkmate)
        } else {
            StatusReport::plain(GameStatus::Stalemate)
        };
    }

    if has_insufficient_material(position) {
        return StatusReport::draw(DrawReason::InsufficientMaterial);
    }

    if halfmove_clock >= 100 {
        return StatusReport::draw(DrawReason::FiftyMoveRule);
    }

    let key = position_key(position);
    if position_counts.get(&key).copied().unwrap_or(0) >= 3 {
        return StatusReport::draw(DrawReason::ThreefoldRepetition);
    }

    if is_in_check(position, turn) {
        return StatusReport::plain(GameStatus::Check);
    }

    StatusReport::plain(GameStatus::Playing)
}

/// Check if the board has insufficient material for checkmate
pub fn has_insufficient_material(position: &Position) -> bool {
    let mut knights = 0;
    let mut bishop_squares = Vec::new();
    let mut others = 0;

    for (square, piece) in position.pieces() {
        match piece.kind {
            PieceKind::King => {}
            PieceKind::Knight => knights += 1,
            PieceKind::Bishop => bishop_squares.push(square.is_light()),
            PieceKind::Pawn | PieceKind::Rook | PieceKind::Queen => others += 1,
        }
    }

    if others > 0 {
        return false;
    }

    match (knights, bishop_squares.len()) {
        // King vs King
        (0, 0) => true,
        // King and a single minor piece vs King
        (1, 0) | (0, 1) => true,
        // Two knights cannot force mate
        (2, 0) => true,
        // Two bishops on the same square color
        (0, 2) => bishop_squares[0] == bishop_squares[1],
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::notation::from_fen;

    fn report(fen: &str) -> StatusReport {
        let parsed = from_fen(fen).unwrap();
        evaluate_status(&parsed.position, parsed.halfmove_clock, &HashMap::new())
    }

    #[test]
    fn initial_position_is_playing() {
        assert_eq!(report("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").status, GameStatus::Playing);
    }

    #[test]
    fn fools_mate_is_checkmate() {
        let r = report("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert_eq!(r.status, GameStatus::Checkmate);
        assert_eq!(r.draw_reason, None);
    }

    #[test]
    fn cornered_king_is_stalemate() {
        assert_eq!(report("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").status, GameStatus::Stalemate);
    }

    #[test]
    fn king_and_bishop_is_insufficient() {
        let r = report("4k3/8/8/8/8/8/8/2B1K3 b - - 0 1");
        assert_eq!(r.status, GameStatus::Draw);
        assert_eq!(r.draw_reason, Some(DrawReason::InsufficientMaterial));
    }

    #[test]
    fn material_rules_cover_minor_piece_pairs() {
        let insufficient = |fen: &str| has_insufficient_material(&from_fen(fen).unwrap().position);
        assert!(insufficient("4k3/8/8/8/8/8/8/4K3 w - - 0 1"));
        assert!(insufficient("4k3/8/8/8/8/8/8/1N2K1N1 w - - 0 1"));
        // c1 and f4 are both dark squares
        assert!(insufficient("4k3/8/8/8/5B2/8/8/2B1K3 w - - 0 1"));
        assert!(insufficient("4k3/8/8/8/5b2/8/8/2B1K3 w - - 0 1"));
        assert!(!insufficient("4k3/8/8/8/8/8/8/2B1KB2 w - - 0 1"));
        assert!(!insufficient("4k3/8/8/8/8/8/8/1N2KB2 w - - 0 1"));
        assert!(!insufficient("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"));
    }

    #[test]
    fn insufficient_material_wins_over_fifty_moves() {
        let r = report("4k3/8/8/8/8/8/8/4K3 w - - 120 80");
        assert_eq!(r.draw_reason, Some(DrawReason::InsufficientMaterial));
    }

    #[test]
    fn fifty_move_rule_at_hundred_half_moves() {
        let fen = "4k3/8/8/8/8/8/8/R3K3 w - - 100 80";
        assert_eq!(report(fen).draw_reason, Some(DrawReason::FiftyMoveRule));
        let fen = "4k3/8/8/8/8/8/8/R3K3 w - - 99 80";
        assert_eq!(report(fen).status, GameStatus::Playing);
    }

    #[test]
    fn threefold_uses_position_key() {
        let parsed = from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 10 40").unwrap();
        let mut counts = HashMap::new();
        counts.insert(position_key(&parsed.position), 3);
        let r = evaluate_status(&parsed.position, 10, &counts);
        assert_eq!(r.draw_reason, Some(DrawReason::ThreefoldRepetition));

        counts.insert(position_key(&parsed.position), 2);
        assert_eq!(evaluate_status(&parsed.position, 10, &counts).status, GameStatus::Playing);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let parsed = from_fen("r3k2r/8/8/8/8/8/8/R3K2R b KQkq - 4 20").unwrap();
        let counts = HashMap::new();
        let first = evaluate_status(&parsed.position, 4, &counts);
        let second = evaluate_status(&parsed.position, 4, &counts);
        assert_eq!(first, second);
    }

    #[test]
    fn check_is_reported() {
        assert_eq!(report("4k3/8/8/8/8/8/8/R3K2r w - - 0 1").status, GameStatus::Check);
    }
}
