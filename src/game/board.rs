use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the board
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    #[serde(rename = "w")]
    White,
    #[serde(rename = "b")]
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Color::White => "White",
            Color::Black => "Black",
        }
    }

    /// Index into per-color arrays
    pub fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }

    /// Row the color's pieces start on
    pub fn home_row(self) -> usize {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    /// Row delta of a pawn advance
    pub fn forward(self) -> isize {
        match self {
            Color::White => -1,
            Color::Black => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Kinds a pawn may promote to
    pub fn is_promotion_target(self) -> bool {
        matches!(
            self,
            PieceKind::Queen | PieceKind::Rook | PieceKind::Bishop | PieceKind::Knight
        )
    }

    pub fn fen_char(self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        }
    }

    pub fn from_fen_char(c: char) -> Option<PieceKind> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceKind::Pawn),
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            'k' => Some(PieceKind::King),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub const fn new(kind: PieceKind, color: Color) -> Self {
        Piece { kind, color }
    }
}

/// A square addressed by `(row, col)`; row 0 is rank 8, col 0 is file a.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square {
    row: u8,
    col: u8,
}

impl Square {
    pub fn new(row: usize, col: usize) -> Option<Square> {
        if row < 8 && col < 8 {
            Some(Square {
                row: row as u8,
                col: col as u8,
            })
        } else {
            None
        }
    }

    /// Build from signed coordinates, as they arrive from clicks or the wire.
    pub fn from_coords(row: i32, col: i32) -> Option<Square> {
        if (0..8).contains(&row) && (0..8).contains(&col) {
            Square::new(row as usize, col as usize)
        } else {
            None
        }
    }

    pub fn row(self) -> usize {
        self.row as usize
    }

    pub fn col(self) -> usize {
        self.col as usize
    }

    pub fn coords(self) -> [i32; 2] {
        [self.row as i32, self.col as i32]
    }

    /// Square reached by stepping `(dr, dc)`, if still on the board
    pub fn offset(self, dr: isize, dc: isize) -> Option<Square> {
        let row = self.row as isize + dr;
        let col = self.col as isize + dc;
        if (0..8).contains(&row) && (0..8).contains(&col) {
            Square::new(row as usize, col as usize)
        } else {
            None
        }
    }

    /// Parse algebraic form such as `e4`
    pub fn parse(text: &str) -> Option<Square> {
        let mut chars = text.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if chars.next().is_some() || !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
            return None;
        }
        let col = file as usize - 'a' as usize;
        let row = 8 - (rank as usize - '0' as usize);
        Square::new(row, col)
    }

    /// Whether the square is a light square (a1 is dark)
    pub fn is_light(self) -> bool {
        (self.row + self.col) % 2 == 0
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..64).map(|i| Square {
            row: (i / 8) as u8,
            col: (i % 8) as u8,
        })
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = (b'a' + self.col) as char;
        let rank = 8 - self.row;
        write!(f, "{}{}", file, rank)
    }
}

/// Which side a castling move goes to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastleSide {
    #[serde(rename = "castleK")]
    Kingside,
    #[serde(rename = "castleQ")]
    Queenside,
}

/// A move as produced by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub marker: Option<CastleSide>,
    pub promotion: Option<PieceKind>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Move {
            from,
            to,
            marker: None,
            promotion: None,
        }
    }

    pub fn castle(from: Square, to: Square, side: CastleSide) -> Self {
        Move {
            from,
            to,
            marker: Some(side),
            promotion: None,
        }
    }
}

/// Remaining castling options for one color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SideRights {
    pub kingside: bool,
    pub queenside: bool,
}

impl SideRights {
    pub const ALL: SideRights = SideRights {
        kingside: true,
        queenside: true,
    };
    pub const NONE: SideRights = SideRights {
        kingside: false,
        queenside: false,
    };

    pub fn allows(self, side: CastleSide) -> bool {
        match side {
            CastleSide::Kingside => self.kingside,
            CastleSide::Queenside => self.queenside,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CastlingRights {
    pub white: SideRights,
    pub black: SideRights,
}

impl CastlingRights {
    pub const ALL: CastlingRights = CastlingRights {
        white: SideRights::ALL,
        black: SideRights::ALL,
    };
    pub const NONE: CastlingRights = CastlingRights {
        white: SideRights::NONE,
        black: SideRights::NONE,
    };

    pub fn side(&self, color: Color) -> SideRights {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn side_mut(&mut self, color: Color) -> &mut SideRights {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// Rights left after a move touching `from` and `to`.
    ///
    /// Moving a king off its start square drops both sides; anything leaving
    /// or landing on a rook corner drops that corner's side.
    pub fn after_move(self, from: Square, to: Square, moved: Piece) -> CastlingRights {
        let mut next = self;
        if moved.kind == PieceKind::King {
            *next.side_mut(moved.color) = SideRights::NONE;
        }
        for square in [from, to] {
            for color in [Color::White, Color::Black] {
                if square.row() != color.home_row() {
                    continue;
                }
                match square.col() {
                    0 => next.side_mut(color).queenside = false,
                    7 => next.side_mut(color).kingside = false,
                    _ => {}
                }
            }
        }
        next
    }
}

pub type Grid = [[Option<Piece>; 8]; 8];

/// Full position: placement, side to move, castling rights and en-passant target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub board: Grid,
    pub turn: Color,
    pub castling: CastlingRights,
    pub en_passant: Option<Square>,
}

impl Position {
    pub fn empty() -> Self {
        Position {
            board: [[None; 8]; 8],
            turn: Color::White,
            castling: CastlingRights::NONE,
            en_passant: None,
        }
    }

    pub fn initial() -> Self {
        let back = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        let mut position = Position::empty();
        for (col, kind) in back.iter().enumerate() {
            position.board[0][col] = Some(Piece::new(*kind, Color::Black));
            position.board[1][col] = Some(Piece::new(PieceKind::Pawn, Color::Black));
            position.board[6][col] = Some(Piece::new(PieceKind::Pawn, Color::White));
            position.board[7][col] = Some(Piece::new(*kind, Color::White));
        }
        position.castling = CastlingRights::ALL;
        position
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.board[square.row()][square.col()]
    }

    pub fn set(&mut self, square: Square, piece: Option<Piece>) {
        self.board[square.row()][square.col()] = piece;
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        Square::all().find(|sq| self.piece_at(*sq) == Some(Piece::new(PieceKind::King, color)))
    }

    /// Occupied squares with their pieces
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(move |sq| self.piece_at(sq).map(|p| (sq, p)))
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_parsing_matches_row_layout() {
        let e2 = Square::parse("e2").unwrap();
        assert_eq!((e2.row(), e2.col()), (6, 4));
        assert_eq!(e2.to_string(), "e2");
        assert_eq!(Square::parse("a8").unwrap().coords(), [0, 0]);
        assert!(Square::parse("i1").is_none());
        assert!(Square::parse("e9").is_none());
        assert!(Square::from_coords(8, 0).is_none());
        assert!(Square::from_coords(-1, 3).is_none());
    }

    #[test]
    fn initial_position_has_one_king_each() {
        let position = Position::initial();
        assert_eq!(position.king_square(Color::White), Square::parse("e1"));
        assert_eq!(position.king_square(Color::Black), Square::parse("e8"));
        assert_eq!(position.pieces().count(), 32);
    }

    #[test]
    fn rook_leaving_corner_drops_only_that_side() {
        let rook = Piece::new(PieceKind::Rook, Color::White);
        let rights = CastlingRights::ALL.after_move(
            Square::parse("h1").unwrap(),
            Square::parse("h3").unwrap(),
            rook,
        );
        assert!(!rights.white.kingside);
        assert!(rights.white.queenside);
        assert_eq!(rights.black, SideRights::ALL);
    }

    #[test]
    fn capture_on_enemy_corner_drops_enemy_right() {
        let bishop = Piece::new(PieceKind::Bishop, Color::White);
        let rights = CastlingRights::ALL.after_move(
            Square::parse("b7").unwrap(),
            Square::parse("a8").unwrap(),
            bishop,
        );
        assert!(!rights.black.queenside);
        assert!(rights.black.kingside);
        assert_eq!(rights.white, SideRights::ALL);
    }
}
