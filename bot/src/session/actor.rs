use engine::EngineManager;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::commands::*;
use super::events::{BotEvent, SessionLifecycle};
use super::runner::{run_bot, RunOutcome};
use super::BotDeps;
use crate::config::BotConfig;

struct ActiveRun {
    cancel: CancellationToken,
    confirm_tx: mpsc::Sender<()>,
    task: JoinHandle<RunOutcome>,
}

struct ActorState {
    config: BotConfig,
    deps: BotDeps,
    lifecycle: SessionLifecycle,
    last_error: Option<String>,
    run: Option<ActiveRun>,
    /// Kept across runs; `None` while lent to one.
    engine: Option<EngineManager>,
    root: CancellationToken,
}

/// The session actor loop. Owns the lifecycle; the automation loop itself
/// runs as a child task so signals are handled while it works.
pub(crate) async fn run_session_actor(
    config: BotConfig,
    deps: BotDeps,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<BotEvent>,
) {
    let site = config.site;
    run_session_actor_inner(config, deps, cmd_rx, event_tx)
        .instrument(tracing::info_span!("session", %site))
        .await;
}

async fn run_session_actor_inner(
    config: BotConfig,
    deps: BotDeps,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<BotEvent>,
) {
    tracing::info!("Session actor started");
    let engine = EngineManager::new(deps.launcher.clone(), config.engine.clone());
    let mut state = ActorState {
        config,
        deps,
        engine: Some(engine),
        lifecycle: SessionLifecycle::Idle,
        last_error: None,
        run: None,
        root: CancellationToken::new(),
    };

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown) | None => {
                        tracing::info!("Session actor shutting down");
                        state.root.cancel();
                        if let Some(run) = state.run.take() {
                            let finished = run.task.await;
                            finish_run(&mut state, finished, &event_tx);
                        }
                        if let Some(mut engine) = state.engine.take() {
                            engine.shutdown().await;
                        }
                        break;
                    }
                    Some(cmd) => handle_command(&mut state, cmd, &event_tx).await,
                }
            }

            finished = wait_run(&mut state.run) => {
                state.run = None;
                finish_run(&mut state, finished, &event_tx);
            }
        }
    }
}

async fn wait_run(run: &mut Option<ActiveRun>) -> Result<RunOutcome, JoinError> {
    match run {
        Some(run) => (&mut run.task).await,
        None => std::future::pending().await,
    }
}

async fn handle_command(
    state: &mut ActorState,
    cmd: SessionCommand,
    event_tx: &broadcast::Sender<BotEvent>,
) {
    match cmd {
        SessionCommand::Signal { signal, reply } => {
            handle_signal(state, signal, event_tx);
            let _ = reply.send(state.lifecycle);
        }
        SessionCommand::Configure { config, reply } => {
            let result = if state.lifecycle.is_active() {
                Err(SessionError::Running)
            } else if let Err(e) = config.validate() {
                Err(SessionError::from(e))
            } else {
                tracing::info!(site = %config.site, mode = %config.mode, "Configuration updated");
                if let Some(engine) = state.engine.as_mut() {
                    // A failed restart is retried when the next run starts
                    if let Err(e) = engine.configure(config.engine.clone()).await {
                        tracing::warn!("Engine reconfiguration failed: {}", e);
                    }
                }
                state.config = *config;
                Ok(())
            };
            let _ = reply.send(result);
        }
        SessionCommand::Status { reply } => {
            let _ = reply.send(SessionStatus {
                lifecycle: state.lifecycle,
                config: state.config.clone(),
                last_error: state.last_error.clone(),
            });
        }
        SessionCommand::Subscribe { reply } => {
            let _ = reply.send(event_tx.subscribe());
        }
        SessionCommand::Shutdown => {} // Handled in the main loop
    }
}

fn handle_signal(
    state: &mut ActorState,
    signal: OperatorSignal,
    event_tx: &broadcast::Sender<BotEvent>,
) {
    match signal {
        OperatorSignal::Start => {
            if state.lifecycle.is_active() {
                tracing::debug!(lifecycle = ?state.lifecycle, "Start ignored");
                return;
            }
            if let Err(e) = state.config.validate() {
                tracing::warn!("Refusing to start: {}", e);
                let _ = event_tx.send(BotEvent::Warning(format!("cannot start: {e}")));
                return;
            }
            let engine = state.engine.take().unwrap_or_else(|| {
                EngineManager::new(state.deps.launcher.clone(), state.config.engine.clone())
            });
            let cancel = state.root.child_token();
            let (confirm_tx, confirm_rx) = mpsc::channel(1);
            let task = tokio::spawn(
                run_bot(
                    state.config.clone(),
                    state.deps.clone(),
                    engine,
                    confirm_rx,
                    event_tx.clone(),
                    cancel.clone(),
                )
                .in_current_span(),
            );
            state.run = Some(ActiveRun {
                cancel,
                confirm_tx,
                task,
            });
            state.last_error = None;
            set_lifecycle(state, SessionLifecycle::Running, event_tx);
        }
        OperatorSignal::Stop => {
            let Some(run) = state.run.as_ref() else {
                return;
            };
            if state.lifecycle == SessionLifecycle::Running {
                run.cancel.cancel();
                set_lifecycle(state, SessionLifecycle::Stopping, event_tx);
            }
        }
        OperatorSignal::ConfirmManualMove => match state.run.as_ref() {
            // A full buffer already holds a confirmation
            Some(run) => {
                let _ = run.confirm_tx.try_send(());
            }
            None => tracing::debug!("Confirmation ignored, not running"),
        },
    }
}

fn finish_run(
    state: &mut ActorState,
    finished: Result<RunOutcome, JoinError>,
    event_tx: &broadcast::Sender<BotEvent>,
) {
    let failure = match finished {
        Ok((engine, result)) => {
            state.engine = Some(engine);
            result.err().map(|e| e.to_string())
        }
        Err(e) => Some(format!("automation task failed: {e}")),
    };
    match failure {
        None => set_lifecycle(state, SessionLifecycle::Stopped, event_tx),
        Some(reason) => {
            tracing::error!("Bot stopped on error: {}", reason);
            let _ = event_tx.send(BotEvent::Fatal(reason.clone()));
            state.last_error = Some(reason);
            set_lifecycle(state, SessionLifecycle::Error, event_tx);
        }
    }
}

fn set_lifecycle(
    state: &mut ActorState,
    lifecycle: SessionLifecycle,
    event_tx: &broadcast::Sender<BotEvent>,
) {
    if state.lifecycle == lifecycle {
        return;
    }
    tracing::info!(from = ?state.lifecycle, to = ?lifecycle, "Lifecycle changed");
    state.lifecycle = lifecycle;
    let _ = event_tx.send(BotEvent::Lifecycle(lifecycle));
}
