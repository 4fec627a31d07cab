//! One read of the live board, normalised across sites.

use chess::san::replay_san;
use chess::{format_uci_standard, PieceColor, Placement, SanError};
use cozy_chess::{Board, GameStatus, Move};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sites with a purpose-built grabber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    ChessCom,
    Lichess,
}

impl Site {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChessCom => "chesscom",
            Self::Lichess => "lichess",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['.', '-', '_'], "").as_str() {
            "chesscom" => Ok(Self::ChessCom),
            "lichess" | "lichessorg" => Ok(Self::Lichess),
            _ => Err(format!("unknown site '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    Game,
    Puzzle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOverReason {
    Checkmate,
    Resignation,
    Timeout,
    Draw,
    /// The page shows the game as finished without saying why.
    Other,
}

impl GameOverReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkmate => "checkmate",
            Self::Resignation => "resignation",
            Self::Timeout => "timeout",
            Self::Draw => "draw",
            Self::Other => "other",
        }
    }

    /// Classify the result banner a site shows.
    pub fn from_banner(text: &str) -> Self {
        let text = text.to_ascii_lowercase();
        if text.contains("checkmate") {
            Self::Checkmate
        } else if text.contains("resign") || text.contains("abandon") {
            Self::Resignation
        } else if text.contains("time") || text.contains("flag") {
            Self::Timeout
        } else if ["draw", "stalemate", "repetition", "agreement", "insufficient", "50"]
            .iter()
            .any(|k| text.contains(k))
        {
            Self::Draw
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for GameOverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The board element's bounding box in page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Immutable read of the page. Superseded, never mutated.
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub site: Site,
    /// Position the page's move list starts from.
    pub start_fen: String,
    /// Moves read from the page, standard UCI.
    pub history: Vec<String>,
    /// The same moves as SAN.
    pub sans: Vec<String>,
    pub position: Board,
    pub placement: Placement,
    pub side_to_move: PieceColor,
    /// Half-moves since `start_fen`; always `history.len()`.
    pub ply: u32,
    pub move_number: u32,
    /// Remaining time on the local player's clock.
    pub clock: Option<Duration>,
    pub terminal: Option<GameOverReason>,
    pub player: PieceColor,
    pub mode: PageMode,
    pub board_rect: Option<BoardRect>,
    pub url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid start position: {0}")]
    Fen(String),
    #[error(transparent)]
    San(#[from] SanError),
}

impl BoardSnapshot {
    /// Replay a SAN move list from `start_fen`.
    pub fn replay<S: AsRef<str>>(
        site: Site,
        player: PieceColor,
        start_fen: &str,
        sans: &[S],
    ) -> Result<Self, SnapshotError> {
        let start = Board::from_fen(start_fen, false)
            .map_err(|_| SnapshotError::Fen(start_fen.to_string()))?;
        let (moves, _) = replay_san(&start, sans)?;
        Ok(Self::from_moves(site, player, start_fen.to_string(), start, &moves))
    }

    /// A snapshot with no move history, e.g. a puzzle shown mid-game.
    pub fn from_fen(site: Site, player: PieceColor, fen: &str) -> Result<Self, SnapshotError> {
        let start = Board::from_fen(fen, false).map_err(|_| SnapshotError::Fen(fen.to_string()))?;
        Ok(Self::from_moves(site, player, fen.to_string(), start, &[]))
    }

    /// `moves` must be legal in sequence from `start`.
    pub(crate) fn from_moves(
        site: Site,
        player: PieceColor,
        start_fen: String,
        start: Board,
        moves: &[Move],
    ) -> Self {
        let mut position = start;
        let mut history = Vec::with_capacity(moves.len());
        let mut sans = Vec::with_capacity(moves.len());
        for &mv in moves {
            history.push(format_uci_standard(&position, mv));
            sans.push(chess::format_san(&position, mv));
            position.play_unchecked(mv);
        }

        let terminal = match position.status() {
            GameStatus::Won => Some(GameOverReason::Checkmate),
            GameStatus::Drawn => Some(GameOverReason::Draw),
            GameStatus::Ongoing => None,
        };

        Self {
            site,
            start_fen,
            ply: history.len() as u32,
            history,
            sans,
            placement: Placement::from_board(&position),
            side_to_move: position.side_to_move().into(),
            move_number: u32::from(position.fullmove_number()),
            position,
            clock: None,
            terminal,
            player,
            mode: PageMode::Game,
            board_rect: None,
            url: None,
        }
    }

    pub fn with_terminal(mut self, reason: GameOverReason) -> Self {
        self.terminal = Some(reason);
        self
    }

    pub fn with_mode(mut self, mode: PageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_board_rect(mut self, rect: BoardRect) -> Self {
        self.board_rect = Some(rect);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_self_to_move(&self) -> bool {
        self.side_to_move == self.player
    }

    /// Legal moves in the read position, standard UCI.
    pub fn legal_moves(&self) -> Vec<String> {
        let mut moves = Vec::new();
        self.position.generate_moves(|mvs| {
            moves.extend(mvs.into_iter().map(|mv| format_uci_standard(&self.position, mv)));
            false
        });
        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::START_FEN;

    #[test]
    fn test_replay_fills_derived_fields() {
        let snap =
            BoardSnapshot::replay(Site::Lichess, PieceColor::Black, START_FEN, &["e4", "c5", "Nf3"])
                .unwrap();
        assert_eq!(snap.ply, 3);
        assert_eq!(snap.history, vec!["e2e4", "c7c5", "g1f3"]);
        assert_eq!(snap.side_to_move, PieceColor::Black);
        assert_eq!(snap.move_number, 2);
        assert!(snap.is_self_to_move());
        assert!(snap.terminal.is_none());
        assert!(snap.legal_moves().contains(&"d7d6".to_string()));
    }

    #[test]
    fn test_castling_history_is_standard_uci() {
        let snap = BoardSnapshot::replay(
            Site::ChessCom,
            PieceColor::White,
            START_FEN,
            &["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5", "O-O"],
        )
        .unwrap();
        assert_eq!(snap.history.last().map(String::as_str), Some("e1g1"));
        assert_eq!(snap.sans.last().map(String::as_str), Some("O-O"));
    }

    #[test]
    fn test_mate_on_board_sets_terminal() {
        let snap = BoardSnapshot::replay(
            Site::Lichess,
            PieceColor::White,
            START_FEN,
            &["f3", "e5", "g4", "Qh4#"],
        )
        .unwrap();
        assert_eq!(snap.terminal, Some(GameOverReason::Checkmate));
    }

    #[test]
    fn test_illegal_move_list_is_rejected() {
        let err = BoardSnapshot::replay(Site::Lichess, PieceColor::White, START_FEN, &["e5"]);
        assert!(matches!(err, Err(SnapshotError::San(_))));
    }

    #[test]
    fn test_banner_classification() {
        assert_eq!(GameOverReason::from_banner("White won by checkmate"), GameOverReason::Checkmate);
        assert_eq!(GameOverReason::from_banner("Black resigned"), GameOverReason::Resignation);
        assert_eq!(GameOverReason::from_banner("Time out"), GameOverReason::Timeout);
        assert_eq!(GameOverReason::from_banner("Draw by repetition"), GameOverReason::Draw);
        assert_eq!(GameOverReason::from_banner("Game over"), GameOverReason::Other);
    }

    #[test]
    fn test_site_from_str() {
        assert_eq!("chess.com".parse::<Site>(), Ok(Site::ChessCom));
        assert_eq!("Lichess".parse::<Site>(), Ok(Site::Lichess));
        assert!("chess24".parse::<Site>().is_err());
    }
}
