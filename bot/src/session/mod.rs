//! The bot session: a long-lived actor that owns the lifecycle and, while
//! running, one automation loop task.

pub mod actor;
pub mod commands;
pub mod events;
pub mod handle;
pub mod runner;

use std::sync::Arc;

use engine::EngineLauncher;
use tokio::sync::{broadcast, mpsc};

use crate::config::BotConfig;
use crate::executor::SharedPointer;
use crate::grabber::{grabber_for, BoardGrabber};
use crate::page::{Overlay, PageSession};
use crate::snapshot::Site;
use actor::run_session_actor;
pub use commands::{OperatorSignal, SessionError, SessionStatus};
pub use events::{BotEvent, SessionLifecycle};
pub use handle::BotHandle;
pub use runner::RunError;

/// Builds the grabber for a run.
pub type GrabberFactory = Arc<dyn Fn(Site) -> Box<dyn BoardGrabber> + Send + Sync>;

/// Everything outside the process the bot talks to.
#[derive(Clone)]
pub struct BotDeps {
    pub grabbers: GrabberFactory,
    pub pointer: SharedPointer,
    pub overlay: Arc<dyn Overlay>,
    pub launcher: Arc<dyn EngineLauncher>,
}

impl BotDeps {
    /// Read the board through `page` with the grabber matching the configured site.
    pub fn for_page(
        page: Arc<dyn PageSession>,
        pointer: SharedPointer,
        overlay: Arc<dyn Overlay>,
        launcher: Arc<dyn EngineLauncher>,
    ) -> Self {
        Self {
            grabbers: Arc::new(move |site| grabber_for(site, page.clone())),
            pointer,
            overlay,
            launcher,
        }
    }
}

/// Spawn the session actor. It starts Idle and waits for a Start signal.
pub fn spawn_bot(config: BotConfig, deps: BotDeps) -> BotHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(256);
    tokio::spawn(run_session_actor(config, deps, cmd_rx, event_tx));
    BotHandle::new(cmd_tx)
}
