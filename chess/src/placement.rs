//! 8x8 piece placement, independent of move history.
//!
//! Board grabbers fill a `Placement` from whatever the page renders; the game
//! model compares placements to decide which move (if any) connects two reads.

use cozy_chess::{Board, Color, File, Piece, Rank, Square};

use crate::types::{PieceColor, PieceKind};

/// Piece placement only: no side to move, castling rights or clocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Placement {
    squares: [[Option<(PieceKind, PieceColor)>; 8]; 8],
}

impl Placement {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard starting placement.
    pub fn start() -> Self {
        Self::from_board(&Board::default())
    }

    /// Parse the placement field of a FEN string (the other fields are ignored).
    pub fn from_fen(fen: &str) -> Result<Self, PlacementError> {
        let placement = fen
            .split_whitespace()
            .next()
            .ok_or(PlacementError::InvalidFen)?;

        let mut squares = [[None; 8]; 8];
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(PlacementError::InvalidFen);
        }

        for (rank_idx, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - rank_idx;
            let mut file = 0usize;
            for c in rank_str.chars() {
                if file > 7 {
                    return Err(PlacementError::InvalidFen);
                }
                if let Some(skip) = c.to_digit(10) {
                    file += skip as usize;
                } else {
                    let color = if c.is_uppercase() {
                        PieceColor::White
                    } else {
                        PieceColor::Black
                    };
                    let kind = PieceKind::from_char(c).ok_or(PlacementError::InvalidPiece(c))?;
                    squares[rank][file] = Some((kind, color));
                    file += 1;
                }
            }
            if file != 8 {
                return Err(PlacementError::InvalidFen);
            }
        }

        Ok(Placement { squares })
    }

    pub fn from_board(board: &Board) -> Self {
        let mut placement = Self::empty();
        for sq in Square::ALL {
            if let (Some(piece), Some(color)) = (board.piece_on(sq), board.color_on(sq)) {
                placement.set(sq, Some((piece.into(), color.into())));
            }
        }
        placement
    }

    pub fn piece_at(&self, file: u8, rank: u8) -> Option<(PieceKind, PieceColor)> {
        if file > 7 || rank > 7 {
            return None;
        }
        self.squares[rank as usize][file as usize]
    }

    pub fn at(&self, sq: Square) -> Option<(PieceKind, PieceColor)> {
        self.squares[sq.rank() as usize][sq.file() as usize]
    }

    pub fn set(&mut self, sq: Square, piece: Option<(PieceKind, PieceColor)>) {
        self.squares[sq.rank() as usize][sq.file() as usize] = piece;
    }

    pub fn is_empty(&self) -> bool {
        self.squares.iter().flatten().all(Option::is_none)
    }

    pub fn piece_count(&self) -> usize {
        self.squares.iter().flatten().filter(|p| p.is_some()).count()
    }

    /// Squares whose contents differ between `self` and `other`.
    pub fn diff(&self, other: &Placement) -> Vec<Square> {
        Square::ALL
            .into_iter()
            .filter(|&sq| self.at(sq) != other.at(sq))
            .collect()
    }

    /// White material minus Black material, in pawns.
    pub fn material_balance(&self) -> i32 {
        self.squares
            .iter()
            .flatten()
            .flatten()
            .map(|(kind, color)| match color {
                PieceColor::White => kind.material_value(),
                PieceColor::Black => -kind.material_value(),
            })
            .sum()
    }

    /// The placement field of a FEN string.
    pub fn to_fen_field(&self) -> String {
        let mut out = String::with_capacity(72);
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                match self.squares[rank][file] {
                    Some((kind, color)) => {
                        if empty > 0 {
                            out.push(char::from(b'0' + empty));
                            empty = 0;
                        }
                        out.push(match color {
                            PieceColor::White => kind.to_char_upper(),
                            PieceColor::Black => kind.to_char_lower(),
                        });
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push(char::from(b'0' + empty));
            }
            if rank > 0 {
                out.push('/');
            }
        }
        out
    }

    /// Build a playable position from this placement.
    ///
    /// Castling rights are granted wherever king and rook still stand on their
    /// home squares. En passant is never assumed.
    pub fn to_board(&self, side_to_move: PieceColor, fullmove: u32) -> Result<Board, PlacementError> {
        let fen = format!(
            "{} {} {} - 0 {}",
            self.to_fen_field(),
            side_to_move.fen_letter(),
            self.castling_field(),
            fullmove.max(1)
        );
        Board::from_fen(&fen, false).map_err(|_| PlacementError::Unplayable(fen))
    }

    fn castling_field(&self) -> String {
        let home = |file: File, rank: Rank, kind: PieceKind, color: PieceColor| {
            self.at(Square::new(file, rank)) == Some((kind, color))
        };
        let mut rights = String::new();
        let white_king = home(File::E, Rank::First, PieceKind::King, PieceColor::White);
        let black_king = home(File::E, Rank::Eighth, PieceKind::King, PieceColor::Black);
        if white_king && home(File::H, Rank::First, PieceKind::Rook, PieceColor::White) {
            rights.push('K');
        }
        if white_king && home(File::A, Rank::First, PieceKind::Rook, PieceColor::White) {
            rights.push('Q');
        }
        if black_king && home(File::H, Rank::Eighth, PieceKind::Rook, PieceColor::Black) {
            rights.push('k');
        }
        if black_king && home(File::A, Rank::Eighth, PieceKind::Rook, PieceColor::Black) {
            rights.push('q');
        }
        if rights.is_empty() {
            rights.push('-');
        }
        rights
    }
}

impl From<&Board> for Placement {
    fn from(board: &Board) -> Self {
        Self::from_board(board)
    }
}

/// Convert a (kind, color) pair back to cozy-chess values.
pub fn to_cozy(piece: (PieceKind, PieceColor)) -> (Piece, Color) {
    (piece.0.into(), piece.1.into())
}

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("Invalid FEN string")]
    InvalidFen,
    #[error("Invalid piece character: {0}")]
    InvalidPiece(char),
    #[error("Placement is not a playable position: {0}")]
    Unplayable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::START_FEN;
    use proptest::prelude::*;

    #[test]
    fn test_starting_position() {
        let board = Placement::from_fen(START_FEN).unwrap();
        assert_eq!(
            board.piece_at(0, 0),
            Some((PieceKind::Rook, PieceColor::White))
        );
        assert_eq!(
            board.piece_at(4, 0),
            Some((PieceKind::King, PieceColor::White))
        );
        assert_eq!(
            board.piece_at(3, 7),
            Some((PieceKind::Queen, PieceColor::Black))
        );
        assert_eq!(board.piece_at(4, 4), None);
        assert_eq!(board, Placement::start());
    }

    #[test]
    fn test_empty_board() {
        let board = Placement::from_fen("8/8/8/8/8/8/8/8 w - - 0 1").unwrap();
        assert!(board.is_empty());
        assert_eq!(board.piece_count(), 0);
    }

    #[test]
    fn test_short_rank_is_rejected() {
        assert!(Placement::from_fen("rnbqkbn/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR").is_err());
    }

    #[test]
    fn test_diff_after_e4() {
        let mut board = Board::default();
        board.play("e2e4".parse().unwrap());
        let diff = Placement::start().diff(&Placement::from_board(&board));
        assert_eq!(diff.len(), 2);
        assert!(diff.contains(&Square::E2));
        assert!(diff.contains(&Square::E4));
    }

    #[test]
    fn test_to_board_infers_castling() {
        let board = Placement::start().to_board(PieceColor::White, 1).unwrap();
        assert_eq!(board, Board::default());

        let no_rooks = Placement::from_fen("4k3/8/8/8/8/8/8/4K3").unwrap();
        let board = no_rooks.to_board(PieceColor::Black, 30).unwrap();
        assert_eq!(board.side_to_move(), Color::Black);
        assert_eq!(board.to_string(), "4k3/8/8/8/8/8/8/4K3 b - - 0 30");
    }

    #[test]
    fn test_kingless_placement_is_unplayable() {
        let placement = Placement::from_fen("8/8/8/8/8/8/8/8").unwrap();
        assert!(matches!(
            placement.to_board(PieceColor::White, 1),
            Err(PlacementError::Unplayable(_))
        ));
    }

    #[test]
    fn test_material_balance() {
        let placement = Placement::from_fen("4k3/8/8/8/8/8/8/3QK2R").unwrap();
        assert_eq!(placement.material_balance(), 14);
    }

    proptest! {
        #[test]
        fn prop_fen_field_round_trips_through_random_games(choices in proptest::collection::vec(0usize..64, 0..40)) {
            let mut board = Board::default();
            for choice in choices {
                let mut moves = Vec::new();
                board.generate_moves(|mvs| {
                    moves.extend(mvs);
                    false
                });
                if moves.is_empty() {
                    break;
                }
                board.play(moves[choice % moves.len()]);
            }
            let placement = Placement::from_board(&board);
            let reparsed = Placement::from_fen(&placement.to_fen_field()).unwrap();
            prop_assert_eq!(placement, reparsed);
            prop_assert_eq!(placement.to_fen_field(), board.to_string().split(' ').next().unwrap().to_string());
        }
    }
}
