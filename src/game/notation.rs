//! FEN and UCI codecs.

use super::board::{CastlingRights, Color, Move, Piece, PieceKind, Position, SideRights, Square};
use super::movegen::legal_moves;
use crate::error::NotationError;

/// A decoded FEN record
#[derive(Debug, Clone, PartialEq)]
pub struct FenRecord {
    pub position: Position,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

fn placement(position: &Position) -> String {
    let mut rows = Vec::with_capacity(8);
    for row in position.board.iter() {
        let mut text = String::new();
        let mut empty = 0;
        for cell in row.iter() {
            match cell {
                None => empty += 1,
                Some(piece) => {
                    if empty > 0 {
                        text.push_str(&empty.to_string());
                        empty = 0;
                    }
                    let c = piece.kind.fen_char();
                    text.push(match piece.color {
                        Color::White => c.to_ascii_uppercase(),
                        Color::Black => c,
                    });
                }
            }
        }
        if empty > 0 {
            text.push_str(&empty.to_string());
        }
        rows.push(text);
    }
    rows.join("/")
}

fn castling_field(rights: &CastlingRights) -> String {
    let mut field = String::new();
    if rights.white.kingside {
        field.push('K');
    }
    if rights.white.queenside {
        field.push('Q');
    }
    if rights.black.kingside {
        field.push('k');
    }
    if rights.black.queenside {
        field.push('q');
    }
    if field.is_empty() {
        field.push('-');
    }
    field
}

/// Encode a position as a six-field FEN string
pub fn to_fen(position: &Position, halfmove_clock: u32, fullmove_number: u32) -> String {
    let turn = match position.turn {
        Color::White => "w",
        Color::Black => "b",
    };
    let ep = position
        .en_passant
        .map(|sq| sq.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} {} {} {} {}",
        placement(position),
        turn,
        castling_field(&position.castling),
        ep,
        halfmove_clock,
        fullmove_number.max(1)
    )
}

/// Repetition key: placement, side to move, castling and en-passant, no clocks.
pub fn position_key(position: &Position) -> String {
    let fen = to_fen(position, 0, 1);
    fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
}

/// Decode a FEN string. The two clock fields may be omitted.
pub fn from_fen(fen: &str) -> Result<FenRecord, NotationError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() < 4 || fields.len() > 6 {
        return Err(NotationError::Fen(format!("expected 4-6 fields, got {}", fields.len())));
    }

    let mut position = Position::empty();
    let rows: Vec<&str> = fields[0].split('/').collect();
    if rows.len() != 8 {
        return Err(NotationError::Fen("placement must have 8 rows".to_string()));
    }
    for (row, text) in rows.iter().enumerate() {
        let mut col = 0;
        for c in text.chars() {
            if let Some(skip) = c.to_digit(10) {
                col += skip as usize;
                continue;
            }
            let kind = PieceKind::from_fen_char(c)
                .ok_or_else(|| NotationError::Fen(format!("unknown piece '{}'", c)))?;
            let color = if c.is_ascii_uppercase() {
                Color::White
            } else {
                Color::Black
            };
            let square = Square::new(row, col)
                .ok_or_else(|| NotationError::Fen(format!("row {} overflows", row + 1)))?;
            position.set(square, Some(Piece::new(kind, color)));
            col += 1;
        }
        if col != 8 {
            return Err(NotationError::Fen(format!("row {} has {} files", row + 1, col)));
        }
    }

    position.turn = match fields[1] {
        "w" => Color::White,
        "b" => Color::Black,
        other => return Err(NotationError::Fen(format!("bad side to move '{}'", other))),
    };

    let mut rights = CastlingRights::NONE;
    if fields[2] != "-" {
        for c in fields[2].chars() {
            let side: &mut SideRights = if c.is_ascii_uppercase() {
                &mut rights.white
            } else {
                &mut rights.black
            };
            match c.to_ascii_lowercase() {
                'k' => side.kingside = true,
                'q' => side.queenside = true,
                _ => return Err(NotationError::Fen(format!("bad castling flag '{}'", c))),
            }
        }
    }
    position.castling = rights;

    position.en_passant = match fields[3] {
        "-" => None,
        text => Some(
            Square::parse(text)
                .ok_or_else(|| NotationError::Fen(format!("bad en-passant square '{}'", text)))?,
        ),
    };

    let halfmove_clock = match fields.get(4) {
        Some(text) => text
            .parse()
            .map_err(|_| NotationError::Fen(format!("bad half-move clock '{}'", text)))?,
        None => 0,
    };
    let fullmove_number = match fields.get(5) {
        Some(text) => text
            .parse::<u32>()
            .map_err(|_| NotationError::Fen(format!("bad full-move number '{}'", text)))?
            .max(1),
        None => 1,
    };

    Ok(FenRecord {
        position,
        halfmove_clock,
        fullmove_number,
    })
}

/// Encode a move in UCI long algebraic form, e.g. `e2e4` or `e7e8q`.
pub fn move_to_uci(mv: &Move) -> String {
    let mut text = format!("{}{}", mv.from, mv.to);
    if let Some(kind) = mv.promotion {
        text.push(kind.fen_char());
    }
    text
}

/// Resolve a UCI string against the legal moves of `position`.
///
/// The castle marker comes from the matching legal move; a promotion letter
/// overrides the default queen.
pub fn uci_to_move(uci: &str, position: &Position) -> Result<Move, NotationError> {
    let text = uci.trim().to_ascii_lowercase();
    if !(4..=5).contains(&text.len()) || !text.is_ascii() {
        return Err(NotationError::Uci(uci.to_string()));
    }
    let from = Square::parse(&text[0..2]).ok_or_else(|| NotationError::Uci(uci.to_string()))?;
    let to = Square::parse(&text[2..4]).ok_or_else(|| NotationError::Uci(uci.to_string()))?;
    let promotion = match text[4..].chars().next() {
        None => None,
        Some(c) => match PieceKind::from_fen_char(c) {
            Some(kind) if kind.is_promotion_target() => Some(kind),
            _ => return Err(NotationError::Uci(uci.to_string())),
        },
    };

    let legal = legal_moves(position, from)
        .into_iter()
        .find(|mv| mv.to == to)
        .ok_or_else(|| NotationError::IllegalMove(uci.to_string()))?;

    Ok(Move {
        promotion: legal.promotion.map(|default| promotion.unwrap_or(default)),
        ..legal
    })
}
