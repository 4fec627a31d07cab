//! Re-entry into a new puzzle or match after a game ends.

use std::time::Duration;
use tokio::time::Instant;

use crate::grabber::{BoardGrabber, GrabberError, NextGameKind};
use crate::snapshot::{GameOverReason, PageMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    StartNewPuzzle,
    StartNewMatch,
    Idle,
}

pub struct NonStopController {
    puzzles: bool,
    matches: bool,
    cadence: Duration,
    pending: Option<NextAction>,
    last_attempt: Option<Instant>,
    /// Set once the next game was requested; further ticks wait for it.
    requested: bool,
}

impl NonStopController {
    pub fn new(puzzles: bool, matches: bool, cadence: Duration) -> Self {
        Self {
            puzzles,
            matches,
            cadence,
            pending: None,
            last_attempt: None,
            requested: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.puzzles || self.matches
    }

    /// Decide what follows the finished game. Puzzle pages continue with
    /// puzzles, game pages with matches, each only when enabled.
    pub fn on_game_over(&mut self, reason: GameOverReason, mode: PageMode) -> NextAction {
        let action = match mode {
            PageMode::Puzzle if self.puzzles => NextAction::StartNewPuzzle,
            PageMode::Game if self.matches => NextAction::StartNewMatch,
            _ => NextAction::Idle,
        };
        tracing::info!(%reason, ?mode, ?action, "Game over");
        self.pending = (action != NextAction::Idle).then_some(action);
        self.requested = false;
        // First attempt waits one cadence so the result screen settles
        self.last_attempt = Some(Instant::now());
        action
    }

    pub fn pending(&self) -> Option<NextAction> {
        self.pending
    }

    /// Look for the next-game affordance, at most once per cadence. Returns
    /// true when it was found and clicked. A no-op while nothing is pending
    /// or once the click went through.
    pub async fn tick(&mut self, grabber: &mut dyn BoardGrabber) -> Result<bool, GrabberError> {
        if self.requested {
            return Ok(false);
        }
        let kind = match self.pending {
            Some(NextAction::StartNewPuzzle) => NextGameKind::Puzzle,
            Some(NextAction::StartNewMatch) => NextGameKind::Match,
            Some(NextAction::Idle) | None => return Ok(false),
        };
        let now = Instant::now();
        if self
            .last_attempt
            .is_some_and(|last| now.duration_since(last) < self.cadence)
        {
            return Ok(false);
        }
        self.last_attempt = Some(now);

        let clicked = grabber.start_next(kind).await?;
        if clicked {
            self.requested = true;
            tracing::info!(?kind, "Requested next game");
        } else {
            tracing::debug!(?kind, "Next-game button not shown yet");
        }
        Ok(clicked)
    }

    /// The new game is on the board.
    pub fn finish(&mut self) {
        self.pending = None;
        self.last_attempt = None;
        self.requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{BoardSnapshot, Site};
    use crate::testing::FakeTable;
    use chess::{PieceColor, START_FEN};

    fn table() -> FakeTable {
        FakeTable::new(BoardSnapshot::from_fen(Site::Lichess, PieceColor::White, START_FEN).unwrap())
    }

    #[test]
    fn test_action_follows_page_mode() {
        let mut both = NonStopController::new(true, true, Duration::ZERO);
        assert_eq!(
            both.on_game_over(GameOverReason::Checkmate, PageMode::Puzzle),
            NextAction::StartNewPuzzle
        );
        assert_eq!(
            both.on_game_over(GameOverReason::Resignation, PageMode::Game),
            NextAction::StartNewMatch
        );

        let mut puzzles_only = NonStopController::new(true, false, Duration::ZERO);
        assert_eq!(
            puzzles_only.on_game_over(GameOverReason::Timeout, PageMode::Game),
            NextAction::Idle
        );
        assert_eq!(puzzles_only.pending(), None);
    }

    #[tokio::test]
    async fn test_tick_idle_is_noop() {
        let table = table();
        let mut grabber = table.grabber(Site::Lichess);
        let mut controller = NonStopController::new(false, false, Duration::ZERO);
        controller.on_game_over(GameOverReason::Draw, PageMode::Game);
        assert!(!controller.tick(&mut grabber).await.unwrap());
        assert!(table.next_clicks().is_empty());
    }

    #[tokio::test]
    async fn test_tick_is_rate_limited() {
        let table = table();
        let mut grabber = table.grabber(Site::Lichess);
        let mut controller = NonStopController::new(false, true, Duration::from_secs(60));
        controller.on_game_over(GameOverReason::Checkmate, PageMode::Game);

        // Within the first cadence nothing is clicked, however often we ask
        for _ in 0..5 {
            assert!(!controller.tick(&mut grabber).await.unwrap());
        }
        assert!(table.next_clicks().is_empty());
    }

    #[tokio::test]
    async fn test_tick_clicks_when_available() {
        let table = table();
        table.set_next_available(false);
        let mut grabber = table.grabber(Site::Lichess);
        let mut controller = NonStopController::new(true, false, Duration::ZERO);
        controller.on_game_over(GameOverReason::Checkmate, PageMode::Puzzle);

        assert!(!controller.tick(&mut grabber).await.unwrap());
        table.set_next_available(true);
        assert!(controller.tick(&mut grabber).await.unwrap());
        assert_eq!(table.next_clicks(), vec![NextGameKind::Puzzle]);

        controller.finish();
        assert!(!controller.tick(&mut grabber).await.unwrap());
        assert_eq!(table.next_clicks().len(), 1);
    }

    #[tokio::test]
    async fn test_one_click_per_finished_game() {
        let table = table();
        let mut grabber = table.grabber(Site::Lichess);
        let mut controller = NonStopController::new(false, true, Duration::ZERO);
        controller.on_game_over(GameOverReason::Checkmate, PageMode::Game);

        assert!(controller.tick(&mut grabber).await.unwrap());
        // The result screen is still up while the next game loads
        for _ in 0..4 {
            assert!(!controller.tick(&mut grabber).await.unwrap());
        }
        assert_eq!(table.next_clicks(), vec![NextGameKind::Match]);
        assert_eq!(controller.pending(), Some(NextAction::StartNewMatch));
    }
}
