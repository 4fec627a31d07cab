use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::*;
use super::events::{BotEvent, SessionLifecycle};
use crate::config::BotConfig;

/// Cheap, cloneable handle to the session actor.
#[derive(Clone)]
pub struct BotHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl BotHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Deliver an operator signal; returns the lifecycle after it was handled.
    pub async fn signal(&self, signal: OperatorSignal) -> Result<SessionLifecycle, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Signal { signal, reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn start(&self) -> Result<SessionLifecycle, SessionError> {
        self.signal(OperatorSignal::Start).await
    }

    pub async fn stop(&self) -> Result<SessionLifecycle, SessionError> {
        self.signal(OperatorSignal::Stop).await
    }

    pub async fn confirm_manual_move(&self) -> Result<SessionLifecycle, SessionError> {
        self.signal(OperatorSignal::ConfirmManualMove).await
    }

    /// Replace the configuration. Refused while a run is active.
    pub async fn configure(&self, config: BotConfig) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Configure {
            config: Box::new(config),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Status { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<BotEvent>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    /// Stop any run and end the actor. Returns once the actor has exited.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
        self.cmd_tx.closed().await;
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::Internal("Session actor closed".into()))
    }
}
