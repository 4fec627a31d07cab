pub mod converters;
pub mod fen;
pub mod pgn;
pub mod placement;
pub mod san;
pub mod types;
pub mod uci;

pub use converters::*;
pub use fen::{FenError, START_FEN};
pub use placement::{Placement, PlacementError};
pub use san::{format_san, parse_san, SanError};
pub use types::{PieceColor, PieceKind};
pub use uci::{
    convert_cozy_castling_to_uci, convert_uci_castling_to_cozy, format_uci_move, format_uci_standard,
    parse_uci_move,
};
