use tokio::sync::{broadcast, oneshot};

use super::events::{BotEvent, SessionLifecycle};
use crate::config::{BotConfig, ConfigError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Session is running; stop it first")]
    Running,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Edge-triggered operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSignal {
    Start,
    Stop,
    ConfirmManualMove,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub lifecycle: SessionLifecycle,
    pub config: BotConfig,
    /// Why the last run failed, if it did.
    pub last_error: Option<String>,
}

/// Commands sent to the session actor. Each embeds a oneshot for the reply.
pub enum SessionCommand {
    Signal {
        signal: OperatorSignal,
        reply: oneshot::Sender<SessionLifecycle>,
    },
    Configure {
        config: Box<BotConfig>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<BotEvent>>,
    },
    Shutdown,
}
