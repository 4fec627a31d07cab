pub mod config;
pub mod evaluation;
pub mod manager;
pub mod stockfish;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod uci;

pub use config::{Depth, EngineConfig, EngineConfigError};
pub use evaluation::{EngineEvaluation, WdlPercent};
pub use manager::{AnalysisRequest, EngineManager, SearchBudget, MAX_CONSECUTIVE_CRASHES};
pub use stockfish::{find_stockfish_path, StockfishEngine, StockfishLauncher};
pub use uci::{UciError, UciMessage};

use async_trait::async_trait;
use cozy_chess::Move;
use std::time::Duration;

/// Commands sent to the engine
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// `moves` are standard UCI strings (`e1g1` for castling).
    SetPosition { fen: String, moves: Vec<String> },
    SetOption { name: String, value: Option<String> },
    Go(GoParams),
    IsReady,
    Stop,
    Quit,
}

/// Parameters for the "go" command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoParams {
    pub movetime: Option<u64>, // Move time in milliseconds
    pub depth: Option<u8>,     // Search depth
    pub infinite: bool,        // Search until "stop"
}

/// Events received from the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Ready,
    BestMove { mv: Option<Move>, ponder: Option<Move> },
    Info(EngineInfo),
    /// The process closed its output stream.
    Terminated,
}

/// Engine analysis information
#[derive(Debug, Clone, Default)]
pub struct EngineInfo {
    pub depth: Option<u8>,
    pub seldepth: Option<u8>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
    pub wdl: Option<Wdl>,
    pub pv: Vec<Move>, // Principal variation
    pub multipv: Option<u8>,
    pub currmove: Option<Move>,
    pub hashfull: Option<u16>,
    pub nps: Option<u64>,
}

/// Score from the point of view of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    Mate(i8), // Negative for being mated
}

impl Score {
    pub fn display(&self) -> String {
        match self {
            Self::Centipawns(cp) => format!("{:+.2}", *cp as f64 / 100.0),
            Self::Mate(m) if *m > 0 => format!("M{}", m),
            Self::Mate(m) => format!("-M{}", m.unsigned_abs()),
        }
    }

    /// Convert to centipawns for comparison. Mate scores use large values.
    pub fn to_cp(&self) -> i32 {
        match self {
            Self::Centipawns(cp) => *cp,
            Self::Mate(m) if *m > 0 => 30000 - i32::from(*m) * 100,
            Self::Mate(m) => -30000 - i32::from(*m) * 100,
        }
    }

    /// Negate the score (flip perspective).
    pub fn negate(&self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(m) => Self::Mate(-m),
        }
    }
}

/// Raw win/draw/loss counts per mille, side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine process crashed: {0}")]
    Crashed(String),
    #[error("engine gave no result within {0:?}")]
    Timeout(Duration),
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
    #[error("failed to start engine: {0}")]
    Spawn(String),
    #[error("analysis cancelled")]
    Cancelled,
    #[error("engine is not running")]
    NotRunning,
    #[error(transparent)]
    Config(#[from] EngineConfigError),
}

/// A running engine process speaking UCI.
#[async_trait]
pub trait EngineBackend: Send {
    async fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineError>;

    /// Next event from the engine; `None` once every sender is gone.
    async fn recv(&mut self) -> Option<EngineEvent>;

    async fn shutdown(self: Box<Self>);
}

/// Starts engine processes for the manager, including restarts.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, config: &EngineConfig) -> Result<Box<dyn EngineBackend>, EngineError>;
}
