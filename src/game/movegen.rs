//! Legal move generation, attack detection and move application.

use super::board::{CastleSide, Color, Move, Piece, PieceKind, Position, Square};

const KNIGHT_OFFSETS: [(isize, isize); 8] = [
    (2, 1),
    (2, -1),
    (-2, 1),
    (-2, -1),
    (1, 2),
    (1, -2),
    (-1, 2),
    (-1, -2),
];

const KING_OFFSETS: [(isize, isize); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

const ROOK_DIRS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_DIRS: [(isize, isize); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

fn last_row(color: Color) -> usize {
    color.opponent().home_row()
}

fn pawn_start_row(color: Color) -> usize {
    match color {
        Color::White => 6,
        Color::Black => 1,
    }
}

/// Pseudo-legal moves for the piece on `from`.
///
/// With `include_castling == false` the result is exactly the set of squares
/// the piece attacks or can move to, which is what attack detection needs.
fn pseudo_moves(position: &Position, from: Square, include_castling: bool) -> Vec<Move> {
    let piece = match position.piece_at(from) {
        Some(piece) => piece,
        None => return Vec::new(),
    };
    let mut moves = Vec::new();
    let is_enemy = |sq: Square| matches!(position.piece_at(sq), Some(p) if p.color != piece.color);

    match piece.kind {
        PieceKind::Pawn => {
            let dir = piece.color.forward();
            if let Some(one) = from.offset(dir, 0) {
                if position.piece_at(one).is_none() {
                    moves.push(pawn_move(piece.color, from, one));
                    if from.row() == pawn_start_row(piece.color) {
                        if let Some(two) = from.offset(2 * dir, 0) {
                            if position.piece_at(two).is_none() {
                                moves.push(Move::new(from, two));
                            }
                        }
                    }
                }
            }
            for dc in [-1, 1] {
                if let Some(target) = from.offset(dir, dc) {
                    if is_enemy(target) {
                        moves.push(pawn_move(piece.color, from, target));
                    } else if position.en_passant == Some(target) {
                        moves.push(Move::new(from, target));
                    }
                }
            }
        }
        PieceKind::Knight | PieceKind::King => {
            let offsets = if piece.kind == PieceKind::Knight {
                &KNIGHT_OFFSETS
            } else {
                &KING_OFFSETS
            };
            for (dr, dc) in offsets.iter() {
                if let Some(target) = from.offset(*dr, *dc) {
                    if position.piece_at(target).is_none() || is_enemy(target) {
                        moves.push(Move::new(from, target));
                    }
                }
            }
            if piece.kind == PieceKind::King && include_castling {
                castling_moves(position, from, piece.color, &mut moves);
            }
        }
        PieceKind::Bishop | PieceKind::Rook | PieceKind::Queen => {
            let dirs: Vec<(isize, isize)> = match piece.kind {
                PieceKind::Rook => ROOK_DIRS.to_vec(),
                PieceKind::Bishop => BISHOP_DIRS.to_vec(),
                _ => ROOK_DIRS.iter().chain(BISHOP_DIRS.iter()).copied().collect(),
            };
            for (dr, dc) in dirs {
                let mut cursor = from;
                while let Some(next) = cursor.offset(dr, dc) {
                    match position.piece_at(next) {
                        None => moves.push(Move::new(from, next)),
                        Some(blocker) => {
                            if blocker.color != piece.color {
                                moves.push(Move::new(from, next));
                            }
                            break;
                        }
                    }
                    cursor = next;
                }
            }
        }
    }

    moves
}

fn pawn_move(color: Color, from: Square, to: Square) -> Move {
    let mut mv = Move::new(from, to);
    if to.row() == last_row(color) {
        mv.promotion = Some(PieceKind::Queen);
    }
    mv
}

fn castling_moves(position: &Position, from: Square, color: Color, moves: &mut Vec<Move>) {
    let row = color.home_row();
    if from.row() != row || from.col() != 4 {
        return;
    }
    let rights = position.castling.side(color);
    let rook = Some(Piece::new(PieceKind::Rook, color));
    let empty = |col: usize| Square::new(row, col).map_or(false, |sq| position.piece_at(sq).is_none());
    let safe = |col: usize| {
        Square::new(row, col).map_or(false, |sq| !is_square_attacked(position, sq, color))
    };

    if !safe(4) {
        return;
    }

    if rights.allows(CastleSide::Kingside)
        && position.board[row][7] == rook
        && empty(5)
        && empty(6)
        && safe(5)
        && safe(6)
    {
        if let Some(to) = Square::new(row, 6) {
            moves.push(Move::castle(from, to, CastleSide::Kingside));
        }
    }

    if rights.allows(CastleSide::Queenside)
        && position.board[row][0] == rook
        && empty(3)
        && empty(2)
        && empty(1)
        && safe(3)
        && safe(2)
    {
        if let Some(to) = Square::new(row, 2) {
            moves.push(Move::castle(from, to, CastleSide::Queenside));
        }
    }
}

/// Whether any piece of `color`'s opponent attacks `square`.
pub fn is_square_attacked(position: &Position, square: Square, color: Color) -> bool {
    let opponent = color.opponent();
    position
        .pieces()
        .filter(|(_, piece)| piece.color == opponent)
        .any(|(from, piece)| attacks(position, from, piece).contains(&square))
}

/// Squares attacked by `piece` standing on `from`.
fn attacks(position: &Position, from: Square, piece: Piece) -> Vec<Square> {
    if piece.kind == PieceKind::Pawn {
        // Pushes never capture; diagonals always threaten.
        let dir = piece.color.forward();
        return [-1, 1]
            .iter()
            .filter_map(|dc| from.offset(dir, *dc))
            .collect();
    }
    pseudo_moves(position, from, false)
        .into_iter()
        .map(|mv| mv.to)
        .collect()
}

pub fn is_in_check(position: &Position, color: Color) -> bool {
    match position.king_square(color) {
        Some(king) => is_square_attacked(position, king, color),
        None => false,
    }
}

/// Apply `mv` to `position`, returning the resulting position.
///
/// The move is trusted; callers validate against [`legal_moves`] first.
pub fn apply_move(position: &Position, mv: &Move) -> Position {
    let mut next = position.clone();
    let piece = match position.piece_at(mv.from) {
        Some(piece) => piece,
        None => return next,
    };

    next.set(mv.from, None);
    next.set(mv.to, Some(piece));

    if piece.kind == PieceKind::Pawn && position.en_passant == Some(mv.to) {
        if let Some(victim) = Square::new(mv.from.row(), mv.to.col()) {
            next.set(victim, None);
        }
    }

    if piece.kind == PieceKind::Pawn && mv.to.row() == last_row(piece.color) {
        let kind = mv
            .promotion
            .filter(|kind| kind.is_promotion_target())
            .unwrap_or(PieceKind::Queen);
        next.set(mv.to, Some(Piece::new(kind, piece.color)));
    }

    if let Some(side) = mv.marker {
        let row = mv.to.row();
        let (rook_from, rook_to) = match side {
            CastleSide::Kingside => (7, 5),
            CastleSide::Queenside => (0, 3),
        };
        let rook = next.board[row][rook_from].take();
        next.board[row][rook_to] = rook;
    }

    next.en_passant = None;
    if piece.kind == PieceKind::Pawn && mv.from.row().abs_diff(mv.to.row()) == 2 {
        next.en_passant = Square::new((mv.from.row() + mv.to.row()) / 2, mv.from.col());
    }
    next.castling = position.castling.after_move(mv.from, mv.to, piece);
    next.turn = position.turn.opponent();
    next
}

/// Legal moves for the piece on `from`, whichever color it is.
pub fn legal_moves(position: &Position, from: Square) -> Vec<Move> {
    let piece = match position.piece_at(from) {
        Some(piece) => piece,
        None => return Vec::new(),
    };
    pseudo_moves(position, from, true)
        .into_iter()
        .filter(|mv| !is_in_check(&apply_move(position, mv), piece.color))
        .collect()
}

/// Every legal move for `color`.
pub fn all_legal_moves(position: &Position, color: Color) -> Vec<Move> {
    position
        .pieces()
        .filter(|(_, piece)| piece.color == color)
        .flat_map(|(sq, _)| legal_moves(position, sq))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::notation::{from_fen, to_fen};
    use std::collections::BTreeSet;
    use std::str::FromStr;

    fn sq(name: &str) -> Square {
        Square::parse(name).unwrap()
    }

    fn position(fen: &str) -> Position {
        from_fen(fen).unwrap().position
    }

    fn perft(position: &Position, depth: u32) -> u64 {
        if depth == 0 {
            return 1;
        }
        all_legal_moves(position, position.turn)
            .iter()
            .map(|mv| perft(&apply_move(position, mv), depth - 1))
            .sum()
    }

    /// (from, to) pairs from the `chess` crate, keyed by our square layout.
    fn oracle_moves(fen: &str) -> BTreeSet<(Square, Square)> {
        let board = chess::Board::from_str(fen).unwrap();
        let convert = |s: chess::Square| {
            Square::new(7 - s.get_rank().to_index(), s.get_file().to_index()).unwrap()
        };
        chess::MoveGen::new_legal(&board)
            .map(|m| (convert(m.get_source()), convert(m.get_dest())))
            .collect()
    }

    fn our_moves(position: &Position) -> BTreeSet<(Square, Square)> {
        all_legal_moves(position, position.turn)
            .into_iter()
            .map(|m| (m.from, m.to))
            .collect()
    }

    #[test]
    fn initial_perft_matches_known_counts() {
        let start = Position::initial();
        assert_eq!(perft(&start, 1), 20);
        assert_eq!(perft(&start, 2), 400);
        assert_eq!(perft(&start, 3), 8902);
    }

    #[test]
    fn move_sets_agree_with_reference_generator() {
        let fens = [
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
            "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
        ];
        for fen in fens {
            let root = position(fen);
            assert_eq!(our_moves(&root), oracle_moves(fen), "root of {}", fen);
            for mv in all_legal_moves(&root, root.turn) {
                let child = apply_move(&root, &mv);
                let child_fen = to_fen(&child, 0, 1);
                assert_eq!(our_moves(&child), oracle_moves(&child_fen), "after {:?} in {}", mv, fen);
            }
        }
    }

    #[test]
    fn legal_moves_never_leave_own_king_attacked() {
        let mut frontier = vec![Position::initial()];
        for _ in 0..2 {
            let mut next = Vec::new();
            for pos in &frontier {
                for mv in all_legal_moves(pos, pos.turn) {
                    let after = apply_move(pos, &mv);
                    assert!(!is_in_check(&after, pos.turn));
                    next.push(after);
                }
            }
            frontier = next;
        }
    }

    #[test]
    fn kingside_castle_moves_king_and_rook() {
        let pos = position("4k3/8/8/8/8/8/8/4K2R w K - 0 1");
        let castle = legal_moves(&pos, sq("e1"))
            .into_iter()
            .find(|m| m.to == sq("g1"))
            .unwrap();
        assert_eq!(castle.marker, Some(CastleSide::Kingside));
        let after = apply_move(&pos, &castle);
        assert_eq!(after.piece_at(sq("g1")), Some(Piece::new(PieceKind::King, Color::White)));
        assert_eq!(after.piece_at(sq("f1")), Some(Piece::new(PieceKind::Rook, Color::White)));
        assert_eq!(after.piece_at(sq("h1")), None);
        assert!(!after.castling.white.kingside);
    }

    #[test]
    fn castling_through_attacked_square_is_absent() {
        let pos = position("4k1r1/8/8/8/8/8/8/4K2R w K - 0 1");
        assert!(legal_moves(&pos, sq("e1"))
            .iter()
            .all(|m| m.marker.is_none()));

        let transit = position("4kr2/8/8/8/8/8/8/4K2R w K - 0 1");
        assert!(legal_moves(&transit, sq("e1")).iter().all(|m| m.to != sq("g1")));
    }

    #[test]
    fn queenside_allows_attacked_b_file() {
        let pos = position("1r2k3/8/8/8/8/8/8/R3K3 w Q - 0 1");
        let castle = legal_moves(&pos, sq("e1"))
            .into_iter()
            .find(|m| m.marker == Some(CastleSide::Queenside));
        assert!(castle.is_some());
        let after = apply_move(&pos, &castle.unwrap());
        assert_eq!(after.piece_at(sq("d1")), Some(Piece::new(PieceKind::Rook, Color::White)));
    }

    #[test]
    fn en_passant_removes_the_victim() {
        let pos = position("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 1");
        let ep = legal_moves(&pos, sq("e5"))
            .into_iter()
            .find(|m| m.to == sq("d6"))
            .unwrap();
        let after = apply_move(&pos, &ep);
        assert_eq!(after.piece_at(sq("d5")), None);
        assert_eq!(after.piece_at(sq("d6")), Some(Piece::new(PieceKind::Pawn, Color::White)));
    }

    #[test]
    fn double_push_sets_en_passant_target() {
        let pos = Position::initial();
        let after = apply_move(&pos, &Move::new(sq("e2"), sq("e4")));
        assert_eq!(after.en_passant, Some(sq("e3")));
        let later = apply_move(&after, &Move::new(sq("g8"), sq("f6")));
        assert_eq!(later.en_passant, None);
    }

    #[test]
    fn promotion_defaults_to_queen() {
        let pos = position("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        let push = legal_moves(&pos, sq("e7"))
            .into_iter()
            .find(|m| m.to == sq("e8"))
            .unwrap();
        assert_eq!(push.promotion, Some(PieceKind::Queen));
        let after = apply_move(&pos, &push);
        assert_eq!(after.piece_at(sq("e8")), Some(Piece::new(PieceKind::Queen, Color::White)));

        let knight = Move {
            promotion: Some(PieceKind::Knight),
            ..push
        };
        let after = apply_move(&pos, &knight);
        assert_eq!(after.piece_at(sq("e8")), Some(Piece::new(PieceKind::Knight, Color::White)));
    }

    #[test]
    fn pinned_piece_cannot_move_off_line() {
        let pos = position("4k3/4r3/8/8/8/8/4B3/4K3 w - - 0 1");
        assert!(legal_moves(&pos, sq("e2")).is_empty());
    }
}
