//! Standard Algebraic Notation.
//!
//! Parsing is lenient about the decorations sites add or omit (check marks,
//! annotation glyphs, `x`, zero-castling, unicode figurines) and strict about
//! what the move actually is: exactly one legal move must match.

use cozy_chess::{Board, Color, File, GameStatus, Move, Piece, Rank, Square};

use crate::converters::{file_char, file_from_char, format_piece_upper, parse_square, rank_char, rank_from_char};

/// Parse Standard Algebraic Notation (SAN) move
pub fn parse_san(board: &Board, san: &str) -> Result<Move, SanError> {
    let text = normalize(san);
    if text.is_empty() {
        return Err(SanError::InvalidFormat(san.to_string()));
    }

    if text == "O-O" || text == "O-O-O" {
        return find_castle(board, text == "O-O").ok_or_else(|| SanError::NoLegalMove(san.to_string()));
    }

    let mut body: Vec<char> = text.chars().filter(|c| !matches!(c, 'x' | ':' | '-' | '=')).collect();

    let promotion = match body.last() {
        Some(&c) if body.len() > 2 && "QRBNqrbn".contains(c) && body[body.len() - 2].is_ascii_digit() => {
            body.pop();
            Some(promotion_piece(c).ok_or_else(|| SanError::InvalidPromotion(san.to_string()))?)
        }
        _ => None,
    };

    if body.len() < 2 {
        return Err(SanError::InvalidFormat(san.to_string()));
    }
    let dest_text: String = body[body.len() - 2..].iter().collect();
    let dest = parse_square(&dest_text).ok_or_else(|| SanError::InvalidSquare(dest_text.clone()))?;
    let prefix = &body[..body.len() - 2];

    let (piece, hints) = match prefix.first() {
        Some(&c) if "KQRBN".contains(c) => (piece_from_letter(c), &prefix[1..]),
        _ => (Piece::Pawn, prefix),
    };

    let mut from_file: Option<File> = None;
    let mut from_rank: Option<Rank> = None;
    for &c in hints {
        if let Some(file) = file_from_char(c) {
            from_file = Some(file);
        } else if let Some(rank) = rank_from_char(c) {
            from_rank = Some(rank);
        } else if c.is_ascii_alphabetic() {
            return Err(SanError::InvalidFile(c));
        } else {
            return Err(SanError::InvalidRank(c));
        }
    }

    let side = board.side_to_move();
    let candidates: Vec<Move> = legal_moves(board)
        .into_iter()
        .filter(|mv| board.piece_on(mv.from) == Some(piece))
        .filter(|mv| mv.to == dest && !is_castle(board, *mv, side))
        .filter(|mv| mv.promotion == promotion)
        .filter(|mv| from_file.is_none_or(|f| mv.from.file() == f))
        .filter(|mv| from_rank.is_none_or(|r| mv.from.rank() == r))
        .collect();

    match candidates.as_slice() {
        [mv] => Ok(*mv),
        [] => Err(SanError::NoLegalMove(san.to_string())),
        _ => Err(SanError::AmbiguousMove(san.to_string())),
    }
}

/// Format a move as SAN, including disambiguation and check/mate suffix.
pub fn format_san(board: &Board, mv: Move) -> String {
    let side = board.side_to_move();
    let Some(piece) = board.piece_on(mv.from) else {
        return crate::uci::format_uci_move(mv);
    };

    let mut san = String::new();
    if is_castle(board, mv, side) {
        san.push_str(if mv.to.file() > mv.from.file() { "O-O" } else { "O-O-O" });
    } else {
        let is_capture = board.color_on(mv.to) == Some(!side)
            || (piece == Piece::Pawn && mv.from.file() != mv.to.file());

        if piece == Piece::Pawn {
            if is_capture {
                san.push(file_char(mv.from.file()));
            }
        } else {
            san.push(format_piece_upper(piece));
            san.push_str(&disambiguation(board, mv, piece));
        }

        if is_capture {
            san.push('x');
        }
        san.push(file_char(mv.to.file()));
        san.push(rank_char(mv.to.rank()));

        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(format_piece_upper(promo));
        }
    }

    let mut after = board.clone();
    after.play_unchecked(mv);
    if !after.checkers().is_empty() {
        san.push(if after.status() == GameStatus::Won { '#' } else { '+' });
    }
    san
}

/// Replay a whole SAN move list from `board`, returning the moves in order.
pub fn replay_san<S: AsRef<str>>(board: &Board, moves: &[S]) -> Result<(Vec<Move>, Board), SanError> {
    let mut board = board.clone();
    let mut played = Vec::with_capacity(moves.len());
    for san in moves {
        let mv = parse_san(&board, san.as_ref())?;
        board.play_unchecked(mv);
        played.push(mv);
    }
    Ok((played, board))
}

fn disambiguation(board: &Board, mv: Move, piece: Piece) -> String {
    let rivals: Vec<Square> = legal_moves(board)
        .into_iter()
        .filter(|other| {
            other.to == mv.to && other.from != mv.from && board.piece_on(other.from) == Some(piece)
        })
        .map(|other| other.from)
        .collect();

    if rivals.is_empty() {
        String::new()
    } else if rivals.iter().all(|sq| sq.file() != mv.from.file()) {
        file_char(mv.from.file()).to_string()
    } else if rivals.iter().all(|sq| sq.rank() != mv.from.rank()) {
        rank_char(mv.from.rank()).to_string()
    } else {
        format!("{}{}", file_char(mv.from.file()), rank_char(mv.from.rank()))
    }
}

/// cozy-chess encodes castling as "king takes own rook".
fn is_castle(board: &Board, mv: Move, side: Color) -> bool {
    board.piece_on(mv.from) == Some(Piece::King) && board.color_on(mv.to) == Some(side)
}

fn find_castle(board: &Board, king_side: bool) -> Option<Move> {
    let side = board.side_to_move();
    legal_moves(board).into_iter().find(|mv| {
        is_castle(board, *mv, side) && ((mv.to.file() > mv.from.file()) == king_side)
    })
}

fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

fn normalize(san: &str) -> String {
    let mut text: String = san
        .trim()
        .chars()
        .map(|c| match c {
            '♔' | '♚' => 'K',
            '♕' | '♛' => 'Q',
            '♖' | '♜' => 'R',
            '♗' | '♝' => 'B',
            '♘' | '♞' => 'N',
            '0' => 'O',
            other => other,
        })
        .filter(|c| !matches!(c, '+' | '#' | '!' | '?') && !c.is_whitespace())
        .collect();
    if let Some(stripped) = text.strip_suffix("e.p.") {
        text = stripped.to_string();
    }
    text
}

fn piece_from_letter(c: char) -> Piece {
    match c {
        'K' => Piece::King,
        'Q' => Piece::Queen,
        'R' => Piece::Rook,
        'B' => Piece::Bishop,
        _ => Piece::Knight,
    }
}

fn promotion_piece(c: char) -> Option<Piece> {
    match c.to_ascii_uppercase() {
        'Q' => Some(Piece::Queen),
        'R' => Some(Piece::Rook),
        'B' => Some(Piece::Bishop),
        'N' => Some(Piece::Knight),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanError {
    #[error("No legal move found for: {0}")]
    NoLegalMove(String),
    #[error("Ambiguous move: {0}")]
    AmbiguousMove(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Invalid square: {0}")]
    InvalidSquare(String),
    #[error("Invalid file: {0}")]
    InvalidFile(char),
    #[error("Invalid rank: {0}")]
    InvalidRank(char),
    #[error("Invalid promotion: {0}")]
    InvalidPromotion(String),
}
