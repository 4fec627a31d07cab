//! Turning a chosen move into an action on the page.
//!
//! All three modes finish the same way: the move only counts once a later
//! grabber poll shows it on the board.

pub mod auto;
pub mod manual;
pub mod mouseless;
pub mod pointer;

use async_trait::async_trait;
use chess::uci::convert_cozy_castling_to_uci;
use chess::{format_uci_standard, PieceColor, Placement};
use cozy_chess::{Move, Piece, Square};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::grabber::BoardGrabber;
use crate::page::{PageError, Point};
use crate::snapshot::{BoardRect, BoardSnapshot};
use crate::state::GameState;

pub use auto::AutoExecutor;
pub use manual::{ManualExecutor, SupersedePolicy};
pub use mouseless::MouselessExecutor;
pub use pointer::{PointerDriver, SharedPointer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Auto,
    Manual,
    Mouseless,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Mouseless => "mouseless",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "mouseless" => Ok(Self::Mouseless),
            _ => Err(format!("unknown execution mode '{}'", s)),
        }
    }
}

/// A move ready to be played, with everything the executors need to resolve
/// and confirm it.
#[derive(Debug, Clone)]
pub struct PlannedMove {
    /// Standard UCI.
    pub uci: String,
    /// cozy-chess encoding, legal in the tracked position.
    pub mv: Move,
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Piece>,
    pub expected: Placement,
    /// Evaluation text shown beside the overlay arrow.
    pub eval: Option<String>,
}

impl PlannedMove {
    pub fn new(state: &GameState, mv: Move, eval: Option<String>) -> Self {
        let board = state.board();
        let standard = convert_cozy_castling_to_uci(board, mv);
        Self {
            uci: format_uci_standard(board, mv),
            mv,
            from: standard.from,
            to: standard.to,
            promotion: standard.promotion,
            expected: state.expected_after(mv),
            eval,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// The page shows the move; carries the confirming snapshot.
    Confirmed(BoardSnapshot),
    /// Manual mode only: the position moved on before the operator confirmed.
    Superseded(BoardSnapshot),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("move not confirmed after {attempts} attempt(s)")]
    NotConfirmed { attempts: u32 },
    #[error("move injection failed: {0}")]
    InjectionFailed(String),
    #[error("execution cancelled")]
    Cancelled,
    #[error("cannot resolve move on the page: {0}")]
    Unresolvable(String),
    #[error(transparent)]
    Input(#[from] PageError),
}

/// What an executor may touch while it runs.
pub struct ExecutionContext<'a> {
    pub grabber: &'a mut dyn BoardGrabber,
    pub cancel: &'a CancellationToken,
    /// Polls to wait for the move to show before giving up on an attempt.
    pub confirm_polls: u32,
    pub poll_interval: Duration,
}

#[async_trait]
pub trait MoveExecutor: Send {
    fn mode(&self) -> ExecutionMode;

    /// Play `plan` on the page showing `snapshot`.
    async fn execute(
        &mut self,
        plan: &PlannedMove,
        snapshot: &BoardSnapshot,
        ctx: ExecutionContext<'_>,
    ) -> Result<ExecutionResult, ExecutionError>;
}

/// Centre of `square` in page pixels, for a board drawn from `player`'s side.
pub fn square_center(rect: &BoardRect, player: PieceColor, square: Square) -> Point {
    let size_x = rect.width / 8.0;
    let size_y = rect.height / 8.0;
    let file = square.file() as usize as f64;
    let rank = square.rank() as usize as f64;
    let (col, row) = match player {
        PieceColor::White => (file, 7.0 - rank),
        PieceColor::Black => (7.0 - file, rank),
    };
    Point::new(
        rect.x + (col + 0.5) * size_x,
        rect.y + (row + 0.5) * size_y,
    )
}

/// Source and destination centres of `plan` on the page in `snapshot`.
pub(crate) fn resolve(
    plan: &PlannedMove,
    snapshot: &BoardSnapshot,
) -> Result<(Point, Point), ExecutionError> {
    let rect = snapshot
        .board_rect
        .ok_or_else(|| ExecutionError::Unresolvable("board position unknown".to_string()))?;
    Ok((
        square_center(&rect, snapshot.player, plan.from),
        square_center(&rect, snapshot.player, plan.to),
    ))
}

/// Whether `after` shows `plan` played on top of `before`.
pub(crate) fn shows_move(plan: &PlannedMove, before: &BoardSnapshot, after: &BoardSnapshot) -> bool {
    if after.placement == plan.expected && after.side_to_move != before.side_to_move {
        return true;
    }
    // The opponent may already have replied; the move list still shows ours
    after.start_fen == before.start_fen
        && after.history.len() > before.history.len()
        && after.history.get(before.history.len()) == Some(&plan.uci)
        && after.history[..before.history.len()] == before.history[..]
}

pub(crate) enum Observation {
    Confirmed(BoardSnapshot),
    Changed(BoardSnapshot),
}

/// Poll until the page shows `plan`, up to `ctx.confirm_polls` times.
/// `Ok(None)` when it never does.
pub(crate) async fn await_confirmation(
    plan: &PlannedMove,
    before: &BoardSnapshot,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Option<BoardSnapshot>, ExecutionError> {
    for _ in 0..ctx.confirm_polls.max(1) {
        if let Some(Observation::Confirmed(snapshot)) = observe(plan, before, ctx).await? {
            return Ok(Some(snapshot));
        }
    }
    Ok(None)
}

/// One poll after `ctx.poll_interval`. `Ok(None)` if the page is unchanged or
/// could not be read.
pub(crate) async fn observe(
    plan: &PlannedMove,
    before: &BoardSnapshot,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Option<Observation>, ExecutionError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
        _ = tokio::time::sleep(ctx.poll_interval) => {}
    }
    match ctx.grabber.poll().await {
        Ok(after) if shows_move(plan, before, &after) => Ok(Some(Observation::Confirmed(after))),
        Ok(after) if after.placement != before.placement || after.terminal != before.terminal => {
            Ok(Some(Observation::Changed(after)))
        }
        Ok(_) => Ok(None),
        Err(e) => {
            tracing::debug!("Poll failed while confirming move: {}", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Site;
    use crate::testing::FakeTable;
    use chess::START_FEN;

    pub(crate) fn rect() -> BoardRect {
        BoardRect {
            x: 0.0,
            y: 0.0,
            width: 800.0,
            height: 800.0,
        }
    }

    pub(crate) fn snapshot(player: PieceColor, sans: &[&str]) -> BoardSnapshot {
        BoardSnapshot::replay(Site::Lichess, player, START_FEN, sans)
            .unwrap()
            .with_board_rect(rect())
    }

    pub(crate) fn plan(sans: &[&str], uci: &str) -> (GameState, PlannedMove) {
        let state = GameState::new(snapshot(PieceColor::White, sans));
        let mut found = None;
        state.board().generate_moves(|mvs| {
            for mv in mvs {
                if format_uci_standard(state.board(), mv) == uci {
                    found = Some(mv);
                }
            }
            false
        });
        let plan = PlannedMove::new(&state, found.unwrap(), Some("+0.30".to_string()));
        (state, plan)
    }

    #[test]
    fn test_square_center_orientation() {
        let e2 = Square::new(cozy_chess::File::E, cozy_chess::Rank::Second);
        assert_eq!(
            square_center(&rect(), PieceColor::White, e2),
            Point::new(450.0, 650.0)
        );
        assert_eq!(
            square_center(&rect(), PieceColor::Black, e2),
            Point::new(350.0, 150.0)
        );
    }

    #[test]
    fn test_planned_castling_uses_king_squares() {
        let (_, plan) = plan(&["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5"], "e1g1");
        assert_eq!(plan.uci, "e1g1");
        assert_eq!(plan.to, Square::new(cozy_chess::File::G, cozy_chess::Rank::First));
        assert_eq!(plan.mv.to, Square::new(cozy_chess::File::H, cozy_chess::Rank::First));
    }

    #[test]
    fn test_shows_move_by_placement_or_history() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        assert!(shows_move(&plan, &before, &snapshot(PieceColor::White, &["e4"])));
        assert!(shows_move(&plan, &before, &snapshot(PieceColor::White, &["e4", "c5"])));
        assert!(!shows_move(&plan, &before, &snapshot(PieceColor::White, &["d4"])));
        assert!(!shows_move(&plan, &before, &before));
    }

    #[tokio::test]
    async fn test_confirmation_gives_up_after_budget() {
        let (state, plan) = plan(&[], "e2e4");
        let table = FakeTable::new(state.snapshot().clone());
        let mut grabber = table.grabber(Site::Lichess);
        let cancel = CancellationToken::new();
        let mut ctx = ExecutionContext {
            grabber: &mut grabber,
            cancel: &cancel,
            confirm_polls: 3,
            poll_interval: Duration::from_millis(1),
        };
        let confirmed = await_confirmation(&plan, state.snapshot(), &mut ctx).await.unwrap();
        assert!(confirmed.is_none());
        assert_eq!(table.polls(), 3);
    }

    #[tokio::test]
    async fn test_confirmation_observes_cancel() {
        let (state, plan) = plan(&[], "e2e4");
        let table = FakeTable::new(state.snapshot().clone());
        let mut grabber = table.grabber(Site::Lichess);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = ExecutionContext {
            grabber: &mut grabber,
            cancel: &cancel,
            confirm_polls: 3,
            poll_interval: Duration::from_secs(10),
        };
        assert!(matches!(
            await_confirmation(&plan, state.snapshot(), &mut ctx).await,
            Err(ExecutionError::Cancelled)
        ));
        assert_eq!(table.polls(), 0);
    }
}
