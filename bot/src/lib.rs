//! Core of pawnbot: reads a live chess page, keeps a canonical game model,
//! asks a UCI engine for moves and plays them back on the page.

pub mod config;
pub mod delay;
pub mod executor;
pub mod grabber;
pub mod nonstop;
pub mod page;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{BotConfig, ConfigError, DelaySettings};
pub use delay::{compute_think_time, DelaySpec};
pub use executor::{ExecutionMode, SupersedePolicy};
pub use grabber::{BoardGrabber, GrabberError};
pub use nonstop::NextAction;
pub use page::{Overlay, PageError, PageSession, Point, PointerDevice};
pub use report::EvalReport;
pub use session::{
    spawn_bot, BotDeps, BotEvent, BotHandle, OperatorSignal, SessionError, SessionLifecycle,
};
pub use snapshot::{BoardSnapshot, GameOverReason, PageMode, Site};
pub use state::{GameState, PlayedMove, ReconcileResult};
