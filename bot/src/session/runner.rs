//! The automation loop of one run: poll, reconcile, analyse, delay, execute.
//!
//! The session lends its engine to the run, and the run lends it on to a
//! background task per analysis, so polling continues while the engine
//! thinks. At most one analysis is outstanding and at most one move is being
//! executed.

use std::sync::Arc;

use chess::{parse_uci_move, PieceColor, START_FEN};
use cozy_chess::Move;
use engine::{EngineError, EngineEvaluation, EngineLauncher, EngineManager, SearchBudget};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::events::BotEvent;
use super::BotDeps;
use crate::config::BotConfig;
use crate::delay::compute_think_time;
use crate::executor::{
    AutoExecutor, ExecutionContext, ExecutionError, ExecutionMode, ExecutionResult,
    ManualExecutor, MouselessExecutor, MoveExecutor, PlannedMove, PointerDriver,
};
use crate::grabber::{BoardGrabber, GrabberError};
use crate::nonstop::{NextAction, NonStopController};
use crate::report::{build_report, GameStats};
use crate::snapshot::{BoardSnapshot, GameOverReason, PageMode};
use crate::state::{GameState, PlayedMove, ReconcileResult};

/// Why a run ended early.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("engine failed: {0}")]
    Engine(#[from] EngineError),
    #[error("page not recognised after {attempts} reads: {reason}")]
    SchemaMismatch { attempts: u32, reason: String },
    #[error("analysis task failed: {0}")]
    Analysis(String),
}

type AnalysisOutcome = (EngineManager, Result<EngineEvaluation, EngineError>);

/// The engine handed back by a finished run, with how the run ended.
pub(crate) type RunOutcome = (EngineManager, Result<(), RunError>);

struct Analysis {
    /// Ply of the position being analysed.
    ply: u32,
    cancel: CancellationToken,
    task: JoinHandle<AnalysisOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// Run the loop with `engine` until `cancel` fires or the game ends with
/// nothing to follow. The engine comes back still running after a clean
/// stop; a failed run shuts it down first.
pub(crate) async fn run_bot(
    config: BotConfig,
    deps: BotDeps,
    mut engine: EngineManager,
    confirm: mpsc::Receiver<()>,
    events: broadcast::Sender<BotEvent>,
    cancel: CancellationToken,
) -> RunOutcome {
    engine.reset_crash_budget();
    let ready = match engine.configure(config.engine.clone()).await {
        Ok(()) => engine.start().await,
        Err(e) => Err(e),
    };
    if let Err(e) = ready {
        tracing::error!("Engine failed to start: {}", e);
        engine.shutdown().await;
        return (engine, Err(e.into()));
    }
    Runner::new(config, &deps, engine, confirm, events, cancel)
        .run()
        .await
}

fn build_executor(
    config: &BotConfig,
    deps: &BotDeps,
    confirm: mpsc::Receiver<()>,
) -> Box<dyn MoveExecutor> {
    let pointer = PointerDriver::new(
        deps.pointer.clone(),
        config.mouse_latency(),
        config.pointer_steps,
    );
    match config.mode {
        ExecutionMode::Auto => Box::new(AutoExecutor::new(pointer)),
        ExecutionMode::Manual => Box::new(ManualExecutor::new(
            pointer,
            deps.overlay.clone(),
            confirm,
            config.manual_policy,
        )),
        ExecutionMode::Mouseless => Box::new(MouselessExecutor::new(pointer)),
    }
}

struct Runner {
    config: BotConfig,
    launcher: Arc<dyn EngineLauncher>,
    events: broadcast::Sender<BotEvent>,
    cancel: CancellationToken,
    grabber: Box<dyn BoardGrabber>,
    executor: Box<dyn MoveExecutor>,
    nonstop: NonStopController,
    /// `None` while lent to the analysis task.
    engine: Option<EngineManager>,
    analysis: Option<Analysis>,
    /// `None` until a playable game is on the page.
    state: Option<GameState>,
    stats: GameStats,
    /// Latest evaluation and the side it was computed for.
    last_eval: Option<(EngineEvaluation, PieceColor)>,
    failures: u32,
    mismatches: u32,
    backoff_until: Option<Instant>,
    finished_reported: bool,
    /// Set by a resync; analysis waits for the next read.
    resynced: bool,
}

impl Runner {
    fn new(
        config: BotConfig,
        deps: &BotDeps,
        engine: EngineManager,
        confirm: mpsc::Receiver<()>,
        events: broadcast::Sender<BotEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            grabber: (deps.grabbers)(config.site),
            executor: build_executor(&config, deps, confirm),
            nonstop: NonStopController::new(
                config.non_stop_puzzles,
                config.non_stop_matches,
                config.non_stop_poll_interval(),
            ),
            launcher: deps.launcher.clone(),
            config,
            events,
            cancel,
            engine: Some(engine),
            analysis: None,
            state: None,
            stats: GameStats::default(),
            last_eval: None,
            failures: 0,
            mismatches: 0,
            backoff_until: None,
            finished_reported: false,
            resynced: false,
        }
    }

    async fn run(mut self) -> RunOutcome {
        tracing::info!(mode = %self.config.mode, "Bot loop started");
        let result = self.drive().await;

        if let Err(e) = self.cancel_analysis().await {
            tracing::warn!("Analysis did not wind down cleanly: {}", e);
        }
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            // Lost with a failed analysis task
            None => EngineManager::new(self.launcher.clone(), self.config.engine.clone()),
        };
        if result.is_err() {
            engine.shutdown().await;
        }
        tracing::info!("Bot loop finished");
        (engine, result)
    }

    async fn drive(&mut self) -> Result<(), RunError> {
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flow = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("Stop requested");
                    return Ok(());
                }

                joined = wait_analysis(&mut self.analysis) => self.on_analysis(joined).await?,

                _ = ticker.tick() => self.cycle().await?,
            };
            if flow == Flow::Finished {
                return Ok(());
            }
        }
    }

    async fn cycle(&mut self) -> Result<Flow, RunError> {
        if self.backoff_until.is_some_and(|until| Instant::now() < until) {
            return Ok(Flow::Continue);
        }
        match self.grabber.poll().await {
            Ok(snapshot) => {
                self.failures = 0;
                self.mismatches = 0;
                self.backoff_until = None;
                self.process(snapshot).await
            }
            Err(e) => {
                self.on_grabber_error(e)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Reconcile `snapshot`, then keep going for as long as our own moves
    /// produce confirmed positions to reconcile.
    async fn process(&mut self, mut snapshot: BoardSnapshot) -> Result<Flow, RunError> {
        loop {
            if self.on_snapshot(snapshot).await? == Flow::Finished {
                return Ok(Flow::Finished);
            }
            if std::mem::take(&mut self.resynced) {
                return Ok(Flow::Continue);
            }
            match self.advance().await? {
                Some(next) => snapshot = next,
                None => return Ok(Flow::Continue),
            }
        }
    }

    async fn on_snapshot(&mut self, snapshot: BoardSnapshot) -> Result<Flow, RunError> {
        if self.nonstop.pending().is_some() {
            if snapshot.is_terminal() {
                self.request_next_game().await;
                return Ok(Flow::Continue);
            }
            self.nonstop.finish();
            return self.begin_game(snapshot, true).await;
        }

        let Some(state) = self.state.as_mut() else {
            return self.begin_game(snapshot, false).await;
        };

        let emptied = snapshot.ply == 0 && state.ply() > 0 && snapshot.start_fen == START_FEN;
        let navigated = match (&snapshot.url, &state.snapshot().url) {
            (Some(now), Some(before)) => now != before,
            _ => false,
        };
        if !snapshot.is_terminal() && (emptied || navigated || snapshot.player != state.player()) {
            tracing::info!(ply = state.ply(), navigated, "Move list reset on the page");
            self.grabber.reset();
            return self.begin_game(snapshot, true).await;
        }

        let mode = snapshot.mode;
        let player = state.player();
        match state.reconcile(snapshot) {
            ReconcileResult::NoChange => Ok(Flow::Continue),
            ReconcileResult::OpponentMoved(mv) | ReconcileResult::SelfMoveConfirmed(mv) => {
                self.on_move(mv, player).await?;
                Ok(Flow::Continue)
            }
            ReconcileResult::Divergent { previous_ply, ply } => {
                self.cancel_analysis().await?;
                self.resynced = true;
                self.emit(BotEvent::Resynced { previous_ply, ply });
                Ok(Flow::Continue)
            }
            ReconcileResult::GameOver(reason) => self.on_game_over(reason, mode).await,
        }
    }

    async fn on_move(&mut self, mv: PlayedMove, player: PieceColor) -> Result<(), RunError> {
        let by_self = mv.color == player;
        tracing::info!(ply = mv.ply, uci = %mv.uci, san = %mv.san, by_self, "Move played");
        if self.analysis.as_ref().is_some_and(|a| a.ply != mv.ply) {
            self.cancel_analysis().await?;
        }
        if !by_self {
            self.stats.record_opponent(&mv.uci);
        }
        self.emit(BotEvent::MovePlayed { mv, by_self });
        self.emit_report();
        Ok(())
    }

    /// Start working on our move if it is our turn and nothing is in flight.
    async fn advance(&mut self) -> Result<Option<BoardSnapshot>, RunError> {
        if self.analysis.is_some() || self.cancel.is_cancelled() {
            return Ok(None);
        }
        let Some(state) = self.state.as_ref() else {
            return Ok(None);
        };
        if state.is_over() || !state.is_self_to_move() || state.submitted().is_some() {
            return Ok(None);
        }

        if self.config.bongcloud {
            if let Some(mv) = bongcloud_move(state) {
                tracing::info!(ply = state.ply(), "Playing bongcloud move");
                return self.execute(mv, None).await;
            }
        }

        let Some(mut engine) = self.engine.take() else {
            return Ok(None);
        };
        let request = state.analysis_request();
        let ply = state.ply();
        let budget = SearchBudget::from_config(engine.config());
        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let task = tokio::spawn(
            async move {
                let result = engine.analyze(&request, budget, &token).await;
                (engine, result)
            }
            .in_current_span(),
        );
        tracing::debug!(ply, ?budget, "Analysis requested");
        self.analysis = Some(Analysis { ply, cancel, task });
        Ok(None)
    }

    async fn on_analysis(
        &mut self,
        joined: Result<AnalysisOutcome, JoinError>,
    ) -> Result<Flow, RunError> {
        let Some(analysis) = self.analysis.take() else {
            return Ok(Flow::Continue);
        };
        let (engine, result) = joined.map_err(|e| RunError::Analysis(e.to_string()))?;
        let exhausted = engine.crash_budget_exhausted();
        self.engine = Some(engine);

        match result {
            Ok(evaluation) => {
                let current = self.state.as_ref().is_some_and(|s| {
                    s.ply() == analysis.ply
                        && s.is_self_to_move()
                        && !s.is_over()
                        && s.submitted().is_none()
                });
                if !current {
                    tracing::debug!(ply = analysis.ply, "Discarding stale analysis");
                    return Ok(Flow::Continue);
                }
                match self.play(evaluation).await? {
                    Some(snapshot) => self.process(snapshot).await,
                    None => Ok(Flow::Continue),
                }
            }
            Err(EngineError::Cancelled) => Ok(Flow::Continue),
            Err(e @ EngineError::Crashed(_)) if exhausted => Err(e.into()),
            Err(e @ (EngineError::Spawn(_) | EngineError::Config(_))) => Err(e.into()),
            Err(e) => {
                tracing::warn!(ply = analysis.ply, "Analysis failed: {}", e);
                self.emit(BotEvent::Warning(format!("analysis failed: {e}")));
                Ok(Flow::Continue)
            }
        }
    }

    async fn play(&mut self, evaluation: EngineEvaluation) -> Result<Option<BoardSnapshot>, RunError> {
        let Some(state) = self.state.as_ref() else {
            return Ok(None);
        };
        let side = state.side_to_move();
        let score = evaluation.score.map(|s| s.display());
        tracing::info!(
            ply = state.ply(),
            uci = %evaluation.best_move_uci,
            score = score.as_deref().unwrap_or("-"),
            depth = ?evaluation.depth,
            "Engine move"
        );
        self.emit(BotEvent::Recommendation {
            uci: evaluation.best_move_uci.clone(),
            score,
        });
        let mv = evaluation.best_move;
        self.last_eval = Some((evaluation.clone(), side));
        self.execute(mv, Some(evaluation)).await
    }

    /// Delay, then hand `mv` to the executor. Returns a snapshot for the loop
    /// to reconcile next, when there is one.
    async fn execute(
        &mut self,
        mv: Move,
        evaluation: Option<EngineEvaluation>,
    ) -> Result<Option<BoardSnapshot>, RunError> {
        if self.config.delay.enabled {
            let complexity = evaluation.as_ref().map_or(0.5, EngineEvaluation::complexity);
            let pause = compute_think_time(&self.config.delay.spec, complexity);
            tracing::debug!(?pause, complexity, "Holding move");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                _ = time::sleep(pause) => {}
            }
            if let Some(changed) = self.changed_while_waiting().await {
                return Ok(Some(changed));
            }
        }

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let eval_text = evaluation.as_ref().and_then(|e| e.score).map(|s| s.display());
        let plan = PlannedMove::new(state, mv, eval_text);
        state.submit(plan.uci.clone());
        let before = state.snapshot().clone();
        tracing::info!(ply = before.ply, uci = %plan.uci, mode = %self.executor.mode(), "Executing move");

        let ctx = ExecutionContext {
            grabber: self.grabber.as_mut(),
            cancel: &self.cancel,
            confirm_polls: self.config.confirm_polls,
            poll_interval: self.config.poll_interval(),
        };
        let outcome = self.executor.execute(&plan, &before, ctx).await;

        match outcome {
            Ok(ExecutionResult::Confirmed(after)) => {
                let best = evaluation.as_ref().map(|e| e.best_move_uci.as_str());
                let reply = evaluation.as_ref().and_then(EngineEvaluation::predicted_reply);
                self.stats.record_own(&plan.uci, best, reply);
                Ok(Some(after))
            }
            Ok(ExecutionResult::Superseded(after)) => {
                self.clear_submitted();
                Ok(Some(after))
            }
            Err(ExecutionError::Cancelled) => {
                self.clear_submitted();
                Ok(None)
            }
            Err(e) => {
                self.clear_submitted();
                tracing::warn!(uci = %plan.uci, "Move execution failed: {}", e);
                self.emit(BotEvent::Warning(format!("could not play {}: {e}", plan.uci)));
                Ok(None)
            }
        }
    }

    /// A fresh read that no longer shows the position we were about to move in.
    async fn changed_while_waiting(&mut self) -> Option<BoardSnapshot> {
        let state = self.state.as_ref()?;
        let before = state.snapshot();
        match self.grabber.poll().await {
            Ok(now)
                if now.is_terminal()
                    || now.placement != before.placement
                    || now.side_to_move != before.side_to_move =>
            {
                tracing::debug!("Position changed during the delay");
                Some(now)
            }
            _ => None,
        }
    }

    async fn on_game_over(
        &mut self,
        reason: GameOverReason,
        mode: PageMode,
    ) -> Result<Flow, RunError> {
        self.cancel_analysis().await?;
        if let Some(state) = self.state.as_ref() {
            let pgn = state.to_pgn(&pgn_tags(state));
            tracing::info!(%reason, ply = state.ply(), "Game finished");
            self.emit(BotEvent::GameOver { reason, pgn });
            self.emit_report();
        }

        if !self.nonstop.enabled() {
            return Ok(Flow::Finished);
        }
        let action = self.nonstop.on_game_over(reason, mode);
        self.emit(BotEvent::NextGame(action));
        Ok(match action {
            NextAction::Idle => Flow::Finished,
            NextAction::StartNewPuzzle | NextAction::StartNewMatch => Flow::Continue,
        })
    }

    async fn request_next_game(&mut self) {
        match self.nonstop.tick(self.grabber.as_mut()).await {
            // The next game may come up with the board flipped
            Ok(true) => self.grabber.reset(),
            Ok(false) => {}
            Err(e) => tracing::warn!("Next-game request failed: {}", e),
        }
    }

    async fn begin_game(&mut self, snapshot: BoardSnapshot, restarted: bool) -> Result<Flow, RunError> {
        self.cancel_analysis().await?;
        self.stats = GameStats::default();
        self.last_eval = None;
        if let Some(engine) = self.engine.as_mut() {
            engine.reset_crash_budget();
        }
        if restarted {
            self.emit(BotEvent::Restarted);
        }

        if let Some(reason) = snapshot.terminal {
            if !self.nonstop.enabled() {
                if !self.finished_reported {
                    tracing::warn!(%reason, "Game already finished");
                    self.emit(BotEvent::Warning("game already finished".to_string()));
                    self.finished_reported = true;
                }
                self.state = None;
                return Ok(Flow::Continue);
            }
            let mode = snapshot.mode;
            self.state = Some(GameState::new(snapshot));
            return self.on_game_over(reason, mode).await;
        }

        self.finished_reported = false;
        tracing::info!(
            site = %snapshot.site,
            player = ?snapshot.player,
            ply = snapshot.ply,
            mode = ?snapshot.mode,
            "Game detected"
        );
        self.emit(BotEvent::GameStarted {
            site: snapshot.site,
            player: snapshot.player,
            ply: snapshot.ply,
        });
        self.state = Some(GameState::new(snapshot));
        Ok(Flow::Continue)
    }

    fn on_grabber_error(&mut self, error: GrabberError) -> Result<(), RunError> {
        self.failures += 1;
        match &error {
            GrabberError::SchemaMismatch(reason) => {
                self.mismatches += 1;
                if self.mismatches >= self.config.schema_mismatch_budget {
                    return Err(RunError::SchemaMismatch {
                        attempts: self.mismatches,
                        reason: reason.clone(),
                    });
                }
            }
            GrabberError::NotFound(_) | GrabberError::Page(_) => self.mismatches = 0,
        }

        let retries = self.config.grabber_retries.max(1);
        if self.failures < retries {
            tracing::debug!(failures = self.failures, "Board read failed: {}", error);
            return Ok(());
        }
        let exponent = (self.failures - retries).min(4);
        let delay = self.config.poll_interval() * 2u32.pow(exponent);
        self.backoff_until = Some(Instant::now() + delay);
        tracing::warn!(failures = self.failures, ?delay, "Board read failed: {}", error);
        if self.failures == retries {
            self.emit(BotEvent::Warning(format!("board read failed: {error}")));
        }
        Ok(())
    }

    /// Abort the outstanding analysis and take the engine back.
    async fn cancel_analysis(&mut self) -> Result<(), RunError> {
        let Some(analysis) = self.analysis.take() else {
            return Ok(());
        };
        analysis.cancel.cancel();
        let (engine, _) = analysis
            .task
            .await
            .map_err(|e| RunError::Analysis(e.to_string()))?;
        self.engine = Some(engine);
        Ok(())
    }

    fn clear_submitted(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.clear_submitted();
        }
    }

    fn emit_report(&self) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let (evaluation, side) = match &self.last_eval {
            Some((evaluation, side)) => (Some(evaluation), *side),
            None => (None, state.player()),
        };
        let report = build_report(
            evaluation,
            side,
            state.player(),
            &state.placement(),
            &self.stats,
        );
        self.emit(BotEvent::Report(report));
    }

    fn emit(&self, event: BotEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn wait_analysis(analysis: &mut Option<Analysis>) -> Result<AnalysisOutcome, JoinError> {
    match analysis {
        Some(analysis) => (&mut analysis.task).await,
        None => std::future::pending().await,
    }
}

/// The next bongcloud move for the side to move, within the first four plies
/// of a game from the standard position.
fn bongcloud_move(state: &GameState) -> Option<Move> {
    if state.ply() >= 4 || state.snapshot().start_fen != START_FEN {
        return None;
    }
    let line = match state.side_to_move() {
        PieceColor::White => ["e2e3", "e1e2"],
        PieceColor::Black => ["e7e6", "e8e7"],
    };
    let board = state.board();
    line.iter()
        .filter_map(|uci| parse_uci_move(uci))
        .find(|mv| board.is_legal(*mv))
}

fn pgn_tags(state: &GameState) -> Vec<(&'static str, String)> {
    let snapshot = state.snapshot();
    let (white, black) = match state.player() {
        PieceColor::White => ("pawnbot", "Opponent"),
        PieceColor::Black => ("Opponent", "pawnbot"),
    };
    vec![
        ("Event", "Live game".to_string()),
        (
            "Site",
            snapshot
                .url
                .clone()
                .unwrap_or_else(|| snapshot.site.to_string()),
        ),
        ("White", white.to_string()),
        ("Black", black.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::pointer::shared_pointer;
    use crate::grabber::NextGameKind;
    use crate::session::{spawn_bot, BotHandle, SessionLifecycle};
    use crate::snapshot::{BoardRect, Site};
    use crate::testing::{FakeTable, PointerEvent, RecordingOverlay};
    use engine::testing::{Scripted, ScriptedLauncher};
    use engine::EngineCommand;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn rect() -> BoardRect {
        BoardRect {
            x: 0.0,
            y: 0.0,
            width: 800.0,
            height: 800.0,
        }
    }

    fn board(player: PieceColor, sans: &[&str]) -> BoardSnapshot {
        BoardSnapshot::replay(Site::Lichess, player, START_FEN, sans)
            .unwrap()
            .with_board_rect(rect())
    }

    fn position(player: PieceColor, fen: &str) -> BoardSnapshot {
        BoardSnapshot::from_fen(Site::Lichess, player, fen)
            .unwrap()
            .with_board_rect(rect())
    }

    fn config() -> BotConfig {
        BotConfig {
            poll_interval_ms: 5,
            non_stop_poll_interval_ms: 5,
            confirm_polls: 5,
            pointer_steps: 2,
            ..Default::default()
        }
    }

    fn deps(table: &FakeTable, launcher: &ScriptedLauncher) -> BotDeps {
        let grabbing = table.clone();
        BotDeps {
            grabbers: Arc::new(move |site| {
                Box::new(grabbing.grabber(site)) as Box<dyn BoardGrabber>
            }),
            pointer: shared_pointer(table.pointer()),
            overlay: Arc::new(RecordingOverlay::default()),
            launcher: Arc::new(launcher.clone()),
        }
    }

    async fn started(
        config: BotConfig,
        table: &FakeTable,
        launcher: &ScriptedLauncher,
    ) -> (BotHandle, broadcast::Receiver<BotEvent>) {
        let handle = spawn_bot(config, deps(table, launcher));
        let events = handle.subscribe().await.unwrap();
        assert_eq!(handle.start().await.unwrap(), SessionLifecycle::Running);
        (handle, events)
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<BotEvent>,
        wanted: impl Fn(&BotEvent) -> bool,
    ) -> BotEvent {
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if wanted(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await;
        seen.expect("expected event was not broadcast")
    }

    #[tokio::test]
    async fn test_plays_engine_move_and_waits_for_opponent() {
        let table = FakeTable::new(board(PieceColor::White, &[]));
        table.after_own_move(board(PieceColor::White, &["e4"]));
        let launcher = ScriptedLauncher::new([Scripted::scored("e2e4", 30, &["e2e4", "e7e5"])]);
        let (handle, mut events) = started(config(), &table, &launcher).await;

        let played = wait_for(&mut events, |e| matches!(e, BotEvent::MovePlayed { .. })).await;
        let BotEvent::MovePlayed { mv, by_self } = played else {
            unreachable!()
        };
        assert!(by_self);
        assert_eq!(mv.uci, "e2e4");
        assert!(table.pointer_events().contains(&PointerEvent::Press));

        // Black to move: the bot keeps polling without playing
        table.set(board(PieceColor::White, &["e4", "e5"]));
        let reply = wait_for(&mut events, |e| matches!(e, BotEvent::MovePlayed { by_self: false, .. })).await;
        let BotEvent::MovePlayed { mv, .. } = reply else {
            unreachable!()
        };
        assert_eq!(mv.uci, "e7e5");
        let report = wait_for(&mut events, |e| matches!(e, BotEvent::Report(_))).await;
        let BotEvent::Report(report) = report else {
            unreachable!()
        };
        assert_eq!(report.opponent_prediction, Some(100.0));

        assert_eq!(handle.stop().await.unwrap(), SessionLifecycle::Stopping);
        wait_for(&mut events, |e| {
            matches!(e, BotEvent::Lifecycle(SessionLifecycle::Stopped))
        })
        .await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_checkmate_routes_to_next_match() {
        let table = FakeTable::new(position(
            PieceColor::Black,
            "6k1/5ppp/8/8/8/8/8/3R2K1 w - - 0 30",
        ));
        table.after_next_game(board(PieceColor::Black, &[]));
        let launcher = ScriptedLauncher::default();
        let config = BotConfig {
            non_stop_matches: true,
            ..config()
        };
        let (handle, mut events) = started(config, &table, &launcher).await;
        wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;

        table.set(position(PieceColor::Black, "3R2k1/5ppp/8/8/8/8/8/6K1 b - - 0 30"));
        let over = wait_for(&mut events, |e| matches!(e, BotEvent::GameOver { .. })).await;
        let BotEvent::GameOver { reason, pgn } = over else {
            unreachable!()
        };
        assert_eq!(reason, GameOverReason::Checkmate);
        assert!(pgn.contains("Rd8#"));
        assert!(pgn.contains("[Result \"1-0\"]"));

        let next = wait_for(&mut events, |e| matches!(e, BotEvent::NextGame(_))).await;
        assert!(matches!(next, BotEvent::NextGame(NextAction::StartNewMatch)));
        wait_for(&mut events, |e| matches!(e, BotEvent::Restarted)).await;
        let started = wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;
        assert!(matches!(started, BotEvent::GameStarted { ply: 0, .. }));
        assert_eq!(table.next_clicks(), vec![NextGameKind::Match]);

        let status = handle.status().await.unwrap();
        assert_eq!(status.lifecycle, SessionLifecycle::Running);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_game_over_without_non_stop_ends_run() {
        let table = FakeTable::new(position(
            PieceColor::Black,
            "6k1/5ppp/8/8/8/8/8/3R2K1 w - - 0 30",
        ));
        let launcher = ScriptedLauncher::default();
        let (handle, mut events) = started(config(), &table, &launcher).await;
        wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;

        table.set(position(PieceColor::Black, "3R2k1/5ppp/8/8/8/8/8/6K1 b - - 0 30"));
        wait_for(&mut events, |e| matches!(e, BotEvent::GameOver { .. })).await;
        wait_for(&mut events, |e| {
            matches!(e, BotEvent::Lifecycle(SessionLifecycle::Stopped))
        })
        .await;
        assert!(table.next_clicks().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_board_is_not_fatal() {
        let table = FakeTable::new(board(PieceColor::Black, &[]));
        table.clear();
        let launcher = ScriptedLauncher::default();
        let (handle, mut events) = started(config(), &table, &launcher).await;

        wait_for(&mut events, |e| matches!(e, BotEvent::Warning(_))).await;
        assert!(table.polls() >= 3);
        assert_eq!(
            handle.status().await.unwrap().lifecycle,
            SessionLifecycle::Running
        );

        table.set(board(PieceColor::Black, &[]));
        wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;
        assert_eq!(
            handle.status().await.unwrap().lifecycle,
            SessionLifecycle::Running
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_persistent_schema_mismatch_is_fatal() {
        let table = FakeTable::new(board(PieceColor::White, &[]));
        for _ in 0..3 {
            table.fail_next(GrabberError::SchemaMismatch("no move list".to_string()));
        }
        let launcher = ScriptedLauncher::default();
        let config = BotConfig {
            schema_mismatch_budget: 3,
            grabber_retries: 10,
            ..config()
        };
        let (handle, mut events) = started(config, &table, &launcher).await;

        wait_for(&mut events, |e| {
            matches!(e, BotEvent::Lifecycle(SessionLifecycle::Error))
        })
        .await;
        let status = handle.status().await.unwrap();
        assert!(status.last_error.unwrap().contains("no move list"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_two_engine_crashes_are_fatal() {
        let table = FakeTable::new(board(PieceColor::White, &[]));
        let launcher = ScriptedLauncher::new([Scripted::Crash, Scripted::Crash]);
        let (handle, mut events) = started(config(), &table, &launcher).await;

        wait_for(&mut events, |e| {
            matches!(e, BotEvent::Lifecycle(SessionLifecycle::Error))
        })
        .await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.lifecycle, SessionLifecycle::Error);
        assert!(status.last_error.unwrap().contains("crashed"));
        assert!(table.pointer_events().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_crash_recovers() {
        let table = FakeTable::new(board(PieceColor::White, &[]));
        table.after_own_move(board(PieceColor::White, &["e4"]));
        let launcher = ScriptedLauncher::new([Scripted::Crash, Scripted::best("e2e4")]);
        let (handle, mut events) = started(config(), &table, &launcher).await;

        wait_for(&mut events, |e| matches!(e, BotEvent::MovePlayed { by_self: true, .. })).await;
        assert_eq!(launcher.launches(), 2);
        assert_eq!(
            handle.status().await.unwrap().lifecycle,
            SessionLifecycle::Running
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_engine_spawn_failure_is_fatal() {
        let table = FakeTable::new(board(PieceColor::White, &[]));
        let launcher = ScriptedLauncher::default();
        launcher.fail_next_launches(1);
        let (handle, mut events) = started(config(), &table, &launcher).await;

        let fatal = wait_for(&mut events, |e| matches!(e, BotEvent::Fatal(_))).await;
        assert!(matches!(fatal, BotEvent::Fatal(ref reason) if reason.contains("failed to start")));
        assert_eq!(table.polls(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bongcloud_skips_engine() {
        let table = FakeTable::new(board(PieceColor::White, &[]));
        table.after_own_move(board(PieceColor::White, &["e3"]));
        let launcher = ScriptedLauncher::default();
        let config = BotConfig {
            bongcloud: true,
            ..config()
        };
        let (handle, mut events) = started(config, &table, &launcher).await;

        let played = wait_for(&mut events, |e| matches!(e, BotEvent::MovePlayed { .. })).await;
        assert!(matches!(played, BotEvent::MovePlayed { ref mv, .. } if mv.uci == "e2e3"));
        let searched = launcher
            .commands()
            .iter()
            .any(|c| matches!(c, engine::EngineCommand::Go(_)));
        assert!(!searched);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_mouseless_injects_move() {
        let table = FakeTable::new(board(PieceColor::Black, &["d4"]));
        table.after_own_move(board(PieceColor::Black, &["d4", "Nf6"]));
        let launcher = ScriptedLauncher::new([Scripted::best("g8f6")]);
        let config = BotConfig {
            mode: ExecutionMode::Mouseless,
            ..config()
        };
        let (handle, mut events) = started(config, &table, &launcher).await;

        wait_for(&mut events, |e| matches!(e, BotEvent::MovePlayed { by_self: true, .. })).await;
        assert_eq!(table.injected(), vec![("g8f6".to_string(), 1)]);
        assert!(table.pointer_events().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_emptied_move_list_restarts() {
        let table = FakeTable::new(board(PieceColor::Black, &["e4", "e5", "Nf3"]));
        let launcher = ScriptedLauncher::new([Scripted::best("b8c6")]);
        table.after_own_move(board(PieceColor::Black, &["e4", "e5", "Nf3", "Nc6"]));
        let (handle, mut events) = started(config(), &table, &launcher).await;
        wait_for(&mut events, |e| matches!(e, BotEvent::MovePlayed { by_self: true, .. })).await;

        table.set(board(PieceColor::Black, &[]));
        wait_for(&mut events, |e| matches!(e, BotEvent::Restarted)).await;
        assert!(table.resets() >= 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_page_navigation_restarts() {
        let first = board(PieceColor::Black, &["e4"]).with_url("https://lichess.org/aaaa");
        let table = FakeTable::new(first);
        let launcher = ScriptedLauncher::new([Scripted::best("e7e5"), Scripted::best("e7e5")]);
        let (handle, mut events) = started(config(), &table, &launcher).await;
        wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;

        table.set(board(PieceColor::Black, &["d4"]).with_url("https://lichess.org/bbbb"));
        wait_for(&mut events, |e| matches!(e, BotEvent::Restarted)).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_resync_waits_a_cycle_before_analysing() {
        let table = FakeTable::new(board(PieceColor::White, &["e4"]));
        let launcher = ScriptedLauncher::default();
        let mut engine = EngineManager::new(Arc::new(launcher.clone()), config().engine);
        engine.start().await.unwrap();
        let (events, _keep) = broadcast::channel(64);
        let (_confirm, confirm_rx) = mpsc::channel(1);
        let mut runner = Runner::new(
            config(),
            &deps(&table, &launcher),
            engine,
            confirm_rx,
            events,
            CancellationToken::new(),
        );
        let searches = |launcher: &ScriptedLauncher| {
            launcher
                .commands()
                .iter()
                .filter(|c| matches!(c, EngineCommand::Go(_)))
                .count()
        };

        // Opponent to move
        runner.cycle().await.unwrap();
        assert!(runner.analysis.is_none());

        // Two plies at once cannot be explained move by move
        table.set(board(PieceColor::White, &["e4", "e5", "Nf3", "Nc6"]));
        runner.cycle().await.unwrap();
        assert_eq!(runner.state.as_ref().map(GameState::ply), Some(4));
        assert!(runner.analysis.is_none());
        assert_eq!(searches(&launcher), 0);

        runner.cycle().await.unwrap();
        assert!(runner.analysis.is_some());
        runner.cancel_analysis().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_is_kept_across_runs_and_reconfigured() {
        let table = FakeTable::new(board(PieceColor::White, &["e4"]));
        let launcher = ScriptedLauncher::default();
        let (handle, mut events) = started(config(), &table, &launcher).await;
        let stopped = |e: &BotEvent| matches!(e, BotEvent::Lifecycle(SessionLifecycle::Stopped));

        wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;
        handle.stop().await.unwrap();
        wait_for(&mut events, stopped).await;

        // Skill level is applied live
        let mut tuned = config();
        tuned.engine.skill_level = 4;
        handle.configure(tuned.clone()).await.unwrap();
        assert_eq!(handle.start().await.unwrap(), SessionLifecycle::Running);
        wait_for(&mut events, |e| matches!(e, BotEvent::GameStarted { .. })).await;
        assert_eq!(launcher.launches(), 1);

        handle.stop().await.unwrap();
        wait_for(&mut events, stopped).await;

        // Hash size needs a new process
        tuned.engine.hash_mb = 128;
        handle.configure(tuned).await.unwrap();
        assert_eq!(launcher.launches(), 2);
        handle.shutdown().await;
    }
}
