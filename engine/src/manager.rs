//! Long-lived engine ownership with the crash and timeout policy.
//!
//! One process serves many `analyze` calls. A crash restarts the process once;
//! a second consecutive crash is left for the caller to treat as fatal. A
//! search that overruns its deadline is stopped and retried once with a
//! smaller budget.

use crate::evaluation::SearchProgress;
use crate::{
    Depth, EngineBackend, EngineCommand, EngineConfig, EngineError, EngineEvaluation, EngineEvent,
    EngineLauncher, GoParams,
};
use cozy_chess::Board;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Crashes in a row after which the manager stops restarting the engine.
pub const MAX_CONSECUTIVE_CRASHES: u32 = 2;

/// A position to analyse: root FEN and the standard UCI moves played from it.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub start_fen: String,
    pub moves: Vec<String>,
    /// The position after `moves`, used to check the engine's answer.
    pub board: Board,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBudget {
    Depth(u8),
    MoveTime(Duration),
}

impl SearchBudget {
    pub fn from_config(config: &EngineConfig) -> Self {
        match config.depth {
            Depth::Limited(depth) => Self::Depth(depth.max(1)),
            Depth::Unbounded => Self::MoveTime(Duration::from_millis(config.move_time_ms.max(1))),
        }
    }

    /// The budget used for the single retry after a timeout.
    pub fn reduced(self) -> Self {
        match self {
            Self::Depth(depth) => Self::Depth((depth / 2).max(1)),
            Self::MoveTime(time) => Self::MoveTime((time / 2).max(Duration::from_millis(1))),
        }
    }

    fn go_params(self) -> GoParams {
        match self {
            Self::Depth(depth) => GoParams {
                depth: Some(depth),
                ..Default::default()
            },
            Self::MoveTime(time) => GoParams {
                movetime: Some(time.as_millis() as u64),
                ..Default::default()
            },
        }
    }

    fn deadline(self, grace: Duration) -> Duration {
        match self {
            Self::Depth(_) => grace,
            Self::MoveTime(time) => time + grace,
        }
    }
}

pub struct EngineManager {
    launcher: Arc<dyn EngineLauncher>,
    config: EngineConfig,
    backend: Option<Box<dyn EngineBackend>>,
    consecutive_crashes: u32,
    search_timeout: Duration,
    drain_timeout: Duration,
}

impl EngineManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>, config: EngineConfig) -> Self {
        Self {
            launcher,
            config,
            backend: None,
            consecutive_crashes: 0,
            search_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_millis(500),
        }
    }

    /// Grace period on top of the search budget before a search times out.
    pub fn with_timeouts(mut self, search_timeout: Duration, drain_timeout: Duration) -> Self {
        self.search_timeout = search_timeout;
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.backend.is_some()
    }

    pub fn consecutive_crashes(&self) -> u32 {
        self.consecutive_crashes
    }

    pub fn crash_budget_exhausted(&self) -> bool {
        self.consecutive_crashes >= MAX_CONSECUTIVE_CRASHES
    }

    /// Forget earlier crashes, e.g. when a new game starts.
    pub fn reset_crash_budget(&mut self) {
        self.consecutive_crashes = 0;
    }

    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.backend.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let backend = self.launcher.launch(&self.config).await?;
        self.backend = Some(backend);
        Ok(())
    }

    /// Apply a new configuration. Restarts the process only when a value that
    /// cannot change live differs; the rest takes effect on the next search.
    pub async fn configure(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        if config == self.config {
            return Ok(());
        }
        let restart = self.backend.is_some() && self.config.requires_restart(&config);
        self.config = config;
        if restart {
            tracing::info!("Engine configuration requires restart");
            self.stop_process().await;
            self.start().await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(moves = request.moves.len(), ?budget))]
    pub async fn analyze(
        &mut self,
        request: &AnalysisRequest,
        budget: SearchBudget,
        cancel: &CancellationToken,
    ) -> Result<EngineEvaluation, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.crash_budget_exhausted() {
            return Err(EngineError::Crashed(
                "engine crashed repeatedly; not restarting".to_string(),
            ));
        }
        self.start().await?;

        let result = match self.search_once(request, budget, cancel).await {
            Err(EngineError::Timeout(limit)) => {
                tracing::warn!(?limit, "Engine search timed out, retrying with reduced budget");
                self.search_once(request, budget.reduced(), cancel).await
            }
            other => other,
        };

        match result {
            Ok(evaluation) => {
                self.consecutive_crashes = 0;
                Ok(evaluation)
            }
            Err(EngineError::Crashed(reason)) => Err(self.recover_from_crash(reason).await),
            Err(e) => Err(e),
        }
    }

    async fn search_once(
        &mut self,
        request: &AnalysisRequest,
        budget: SearchBudget,
        cancel: &CancellationToken,
    ) -> Result<EngineEvaluation, EngineError> {
        let limit = budget.deadline(self.search_timeout);
        let live_options = self.config.live_options();
        let backend = self.backend.as_mut().ok_or(EngineError::NotRunning)?;

        for (name, value) in live_options {
            backend
                .send(EngineCommand::SetOption {
                    name: name.to_string(),
                    value: Some(value),
                })
                .await?;
        }
        backend
            .send(EngineCommand::SetPosition {
                fen: request.start_fen.clone(),
                moves: request.moves.clone(),
            })
            .await?;
        backend.send(EngineCommand::Go(budget.go_params())).await?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(limit, collect_search(&mut **backend, &request.board)) => Some(result),
        };

        match outcome {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                self.abort_search().await;
                Err(EngineError::Timeout(limit))
            }
            None => {
                tracing::debug!("Analysis cancelled, stopping engine search");
                self.abort_search().await;
                Err(EngineError::Cancelled)
            }
        }
    }

    /// Stop the running search and discard its answer. An engine that does
    /// not produce the final `bestmove` is replaced.
    async fn abort_search(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        let drained = match backend.send(EngineCommand::Stop).await {
            Ok(()) => tokio::time::timeout(self.drain_timeout, drain_until_bestmove(&mut **backend))
                .await
                .unwrap_or(false),
            Err(_) => false,
        };
        if !drained {
            tracing::warn!("Engine did not acknowledge stop, restarting it");
            self.stop_process().await;
            if let Err(e) = self.start().await {
                tracing::error!("Failed to restart engine: {}", e);
            }
        }
    }

    async fn recover_from_crash(&mut self, reason: String) -> EngineError {
        self.consecutive_crashes += 1;
        tracing::error!(
            consecutive = self.consecutive_crashes,
            "Engine crashed: {}",
            reason
        );
        self.stop_process().await;
        if self.crash_budget_exhausted() {
            return EngineError::Crashed(reason);
        }
        match self.start().await {
            Ok(()) => {
                tracing::info!("Engine restarted after crash");
                EngineError::Crashed(reason)
            }
            Err(e) => e,
        }
    }

    async fn stop_process(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.shutdown().await;
        }
    }

    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down engine");
        self.stop_process().await;
    }
}

async fn collect_search(
    backend: &mut dyn EngineBackend,
    board: &Board,
) -> Result<EngineEvaluation, EngineError> {
    let mut progress = SearchProgress::default();
    loop {
        match backend.recv().await {
            Some(EngineEvent::Info(info)) => progress.absorb(info),
            Some(EngineEvent::BestMove { mv, ponder }) => return progress.finish(board, mv, ponder),
            Some(EngineEvent::Ready) => {}
            Some(EngineEvent::Terminated) | None => {
                return Err(EngineError::Crashed("engine exited during search".to_string()))
            }
        }
    }
}

/// Returns false if the engine exits before answering.
async fn drain_until_bestmove(backend: &mut dyn EngineBackend) -> bool {
    loop {
        match backend.recv().await {
            Some(EngineEvent::BestMove { .. }) => return true,
            Some(EngineEvent::Terminated) | None => return false,
            Some(_) => {}
        }
    }
}
