pub mod process;
pub mod uci;

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

use crate::game::{all_legal_moves, uci_to_move, Move, Position};
use crate::models::config::AiMode;

pub use process::{NewGame, Search, Shutdown, UciEngine};
pub use uci::SearchSlot;

/// A uniformly random legal move for the side to move
pub fn random_move(position: &Position) -> Option<Move> {
    let moves = all_legal_moves(position, position.turn);
    moves.choose(&mut rand::thread_rng()).copied()
}

/// Turn an engine answer into a move, falling back to a random one
pub fn resolve_engine_move(position: &Position, best: Option<&str>) -> Option<Move> {
    best.and_then(|uci| uci_to_move(uci, position).ok())
        .or_else(|| random_move(position))
}

/// How long the automated opponent pretends to think
pub fn think_delay(mode: AiMode) -> Duration {
    let mut rng = rand::thread_rng();
    let ms = match mode {
        AiMode::Engine => 220.0 + rng.gen::<f64>() * 220.0,
        AiMode::Random => 800.0 + rng.gen::<f64>() * 900.0 + rng.gen::<f64>() * 500.0,
    };
    Duration::from_millis(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{from_fen, legal_moves, Square};

    #[test]
    fn random_move_is_legal() {
        let position = Position::initial();
        for _ in 0..20 {
            let mv = random_move(&position).unwrap();
            assert!(legal_moves(&position, mv.from).contains(&mv));
        }
    }

    #[test]
    fn no_move_when_mated() {
        let record = from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3").unwrap();
        assert_eq!(random_move(&record.position), None);
    }

    #[test]
    fn bad_engine_answers_fall_back() {
        let position = Position::initial();
        let e4 = resolve_engine_move(&position, Some("e2e4")).unwrap();
        assert_eq!(e4.to, Square::parse("e4").unwrap());

        for answer in [None, Some("e2e5"), Some("zz")] {
            let mv = resolve_engine_move(&position, answer).unwrap();
            assert!(legal_moves(&position, mv.from).contains(&mv));
        }
    }

    #[test]
    fn think_delays_stay_in_range() {
        for _ in 0..50 {
            let engine = think_delay(AiMode::Engine);
            assert!(engine >= Duration::from_millis(220) && engine <= Duration::from_millis(440));
            let random = think_delay(AiMode::Random);
            assert!(random >= Duration::from_millis(800) && random <= Duration::from_millis(2200));
        }
    }
}
