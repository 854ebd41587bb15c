pub mod board;
pub mod movegen;
pub mod notation;
pub mod opening;
pub mod status;

pub use board::{CastleSide, CastlingRights, Color, Grid, Move, Piece, PieceKind, Position, SideRights, Square};
pub use movegen::{all_legal_moves, apply_move, is_in_check, is_square_attacked, legal_moves};
pub use notation::{from_fen, move_to_uci, position_key, to_fen, uci_to_move, FenRecord};
pub use opening::{describe_opening, OpeningLabel};
pub use status::{evaluate_status, has_insufficient_material, DrawReason, GameStatus, StatusReport};
