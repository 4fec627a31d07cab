use chess::PieceColor;

use crate::nonstop::NextAction;
use crate::report::EvalReport;
use crate::snapshot::{GameOverReason, Site};
use crate::state::PlayedMove;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Idle,
    Running,
    Stopping,
    Stopped,
    /// The last run ended on an unrecoverable failure. Start is allowed again.
    Error,
}

impl SessionLifecycle {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

/// Events broadcast from the session actor to all subscribers.
#[derive(Debug, Clone)]
pub enum BotEvent {
    Lifecycle(SessionLifecycle),
    /// A game was recognised on the page.
    GameStarted {
        site: Site,
        player: PieceColor,
        ply: u32,
    },
    /// The page moved on to a different game.
    Restarted,
    MovePlayed { mv: PlayedMove, by_self: bool },
    /// The engine's choice for our move, before it is played.
    Recommendation { uci: String, score: Option<String> },
    Report(EvalReport),
    /// Tracked history was dropped in favour of the page's position.
    Resynced { previous_ply: u32, ply: u32 },
    GameOver { reason: GameOverReason, pgn: String },
    NextGame(NextAction),
    /// Something failed but the loop carries on.
    Warning(String),
    /// The run ended on this error.
    Fatal(String),
}
