//! Canonical game model built from successive snapshots.
//!
//! The model only advances when a new snapshot is explained by exactly one
//! legal move from the tracked position. Anything else resynchronises from the
//! snapshot and drops history continuity.

use chess::pgn::{write_pgn, PgnResult};
use chess::{format_san, format_uci_standard, PieceColor, Placement};
use cozy_chess::{Board, Move};
use engine::AnalysisRequest;

use crate::snapshot::{BoardSnapshot, GameOverReason};

/// One accepted half-move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedMove {
    /// Standard UCI (`e1g1` for castling).
    pub uci: String,
    pub san: String,
    pub color: PieceColor,
    /// Ply number of this move, starting at 1.
    pub ply: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileResult {
    NoChange,
    OpponentMoved(PlayedMove),
    SelfMoveConfirmed(PlayedMove),
    /// History could not explain the snapshot; state was reset to it.
    Divergent { previous_ply: u32, ply: u32 },
    GameOver(GameOverReason),
}

pub struct GameState {
    start_fen: String,
    start: Board,
    board: Board,
    history: Vec<PlayedMove>,
    last: BoardSnapshot,
    /// Move most recently handed to the executor, standard UCI.
    submitted: Option<String>,
}

impl GameState {
    pub fn new(snapshot: BoardSnapshot) -> Self {
        let start = Board::from_fen(&snapshot.start_fen, false).unwrap_or_default();
        let mut state = Self {
            start_fen: snapshot.start_fen.clone(),
            start: start.clone(),
            board: start,
            history: Vec::new(),
            last: snapshot.clone(),
            submitted: None,
        };
        state.adopt(snapshot);
        state
    }

    pub fn ply(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn history(&self) -> &[PlayedMove] {
        &self.history
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn placement(&self) -> Placement {
        Placement::from_board(&self.board)
    }

    pub fn side_to_move(&self) -> PieceColor {
        self.board.side_to_move().into()
    }

    pub fn player(&self) -> PieceColor {
        self.last.player
    }

    pub fn is_self_to_move(&self) -> bool {
        self.side_to_move() == self.player()
    }

    /// The snapshot most recently accepted.
    pub fn snapshot(&self) -> &BoardSnapshot {
        &self.last
    }

    pub fn is_over(&self) -> bool {
        self.last.terminal.is_some()
    }

    pub fn submitted(&self) -> Option<&str> {
        self.submitted.as_deref()
    }

    /// Record the move handed to the executor so its arrival is recognised.
    pub fn submit(&mut self, uci: impl Into<String>) {
        self.submitted = Some(uci.into());
    }

    pub fn clear_submitted(&mut self) {
        self.submitted = None;
    }

    pub fn reconcile(&mut self, new: BoardSnapshot) -> ReconcileResult {
        if let Some(reason) = new.terminal {
            // Keep the final move in the history when it connects
            match self.single_move_to(&new) {
                Some(mv) => {
                    self.push(mv);
                    self.last = new;
                }
                None if self.is_unchanged(&new) => self.last = new,
                None => self.adopt(new),
            }
            self.submitted = None;
            return ReconcileResult::GameOver(reason);
        }

        if self.is_unchanged(&new) {
            self.last = new;
            return ReconcileResult::NoChange;
        }

        match self.single_move_to(&new) {
            Some(mv) => {
                let played = self.push(mv);
                self.last = new;
                if self.submitted.as_deref() == Some(played.uci.as_str()) {
                    self.submitted = None;
                    ReconcileResult::SelfMoveConfirmed(played)
                } else {
                    ReconcileResult::OpponentMoved(played)
                }
            }
            None => {
                let previous_ply = self.ply();
                tracing::warn!(
                    previous_ply,
                    snapshot_ply = new.ply,
                    "Snapshot not reachable by one legal move, resynchronising"
                );
                self.adopt(new);
                ReconcileResult::Divergent {
                    previous_ply,
                    ply: self.ply(),
                }
            }
        }
    }

    /// Start over from `snapshot`, e.g. when a new game appears.
    pub fn reset(&mut self, snapshot: BoardSnapshot) {
        self.adopt(snapshot);
    }

    /// Placement the page should show once `mv` has been played.
    pub fn expected_after(&self, mv: Move) -> Placement {
        let mut after = self.board.clone();
        after.play_unchecked(mv);
        Placement::from_board(&after)
    }

    pub fn analysis_request(&self) -> AnalysisRequest {
        AnalysisRequest {
            start_fen: self.start_fen.clone(),
            moves: self.history.iter().map(|m| m.uci.clone()).collect(),
            board: self.board.clone(),
        }
    }

    pub fn to_pgn(&self, tags: &[(&str, String)]) -> String {
        let result = match (self.last.terminal, self.board.status()) {
            (Some(_), cozy_chess::GameStatus::Won) => match self.side_to_move() {
                PieceColor::White => PgnResult::BlackWins,
                PieceColor::Black => PgnResult::WhiteWins,
            },
            (Some(GameOverReason::Draw), _) | (Some(_), cozy_chess::GameStatus::Drawn) => {
                PgnResult::Draw
            }
            _ => PgnResult::Ongoing,
        };
        let start_fen = (self.start_fen != chess::START_FEN).then_some(self.start_fen.as_str());
        let start_ply = start_ply(&self.start);
        let sans: Vec<String> = self.history.iter().map(|m| m.san.clone()).collect();
        write_pgn(tags, start_fen, start_ply, &sans, result)
    }

    fn is_unchanged(&self, new: &BoardSnapshot) -> bool {
        new.placement == self.placement() && new.side_to_move == self.side_to_move()
    }

    /// The unique legal move turning the tracked position into `new`.
    fn single_move_to(&self, new: &BoardSnapshot) -> Option<Move> {
        if new.side_to_move == self.side_to_move() {
            return None;
        }
        let mut found = None;
        let mut count = 0;
        self.board.generate_moves(|mvs| {
            for mv in mvs {
                let mut after = self.board.clone();
                after.play_unchecked(mv);
                if Placement::from_board(&after) == new.placement {
                    found = Some(mv);
                    count += 1;
                }
            }
            false
        });
        if count == 1 {
            found
        } else {
            None
        }
    }

    fn push(&mut self, mv: Move) -> PlayedMove {
        let played = PlayedMove {
            uci: format_uci_standard(&self.board, mv),
            san: format_san(&self.board, mv),
            color: self.side_to_move(),
            ply: self.ply() + 1,
        };
        self.board.play_unchecked(mv);
        self.history.push(played.clone());
        played
    }

    fn adopt(&mut self, snapshot: BoardSnapshot) {
        self.start = Board::from_fen(&snapshot.start_fen, false).unwrap_or_else(|_| snapshot.position.clone());
        self.start_fen = snapshot.start_fen.clone();
        self.board = self.start.clone();
        self.history.clear();
        self.submitted = None;

        for (uci, san) in snapshot.history.iter().zip(&snapshot.sans) {
            let Some(mv) = chess::parse_san(&self.board, san).ok() else {
                break;
            };
            self.history.push(PlayedMove {
                uci: uci.clone(),
                san: san.clone(),
                color: self.board.side_to_move().into(),
                ply: self.history.len() as u32 + 1,
            });
            self.board.play_unchecked(mv);
        }

        if self.board != snapshot.position {
            // History did not replay; trust the position alone
            self.start_fen = snapshot.position.to_string();
            self.start = snapshot.position.clone();
            self.board = snapshot.position.clone();
            self.history.clear();
        }
        self.last = snapshot;
    }
}

fn start_ply(board: &Board) -> u32 {
    let full = u32::from(board.fullmove_number()).max(1);
    let black = matches!(board.side_to_move(), cozy_chess::Color::Black);
    (full - 1) * 2 + u32::from(black)
}
