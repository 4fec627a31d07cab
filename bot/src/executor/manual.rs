//! Overlay the recommendation and wait for the operator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::auto::drag_and_confirm;
use super::{
    observe, resolve, ExecutionContext, ExecutionError, ExecutionMode, ExecutionResult,
    MoveExecutor, Observation, PlannedMove, PointerDriver,
};
use crate::page::Overlay;
use crate::snapshot::BoardSnapshot;
use crate::state::GameState;

/// What to do with a pending arrow when the position changes under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupersedePolicy {
    /// Drop the arrow; the loop recomputes for the new position.
    #[default]
    Supersede,
    /// Keep the arrow while the move is still legal and ours to play.
    Hold,
}

enum Waited {
    Done(ExecutionResult),
    Play(PlannedMove, BoardSnapshot),
}

pub struct ManualExecutor {
    pointer: PointerDriver,
    overlay: Arc<dyn Overlay>,
    confirm: mpsc::Receiver<()>,
    policy: SupersedePolicy,
}

impl ManualExecutor {
    pub fn new(
        pointer: PointerDriver,
        overlay: Arc<dyn Overlay>,
        confirm: mpsc::Receiver<()>,
        policy: SupersedePolicy,
    ) -> Self {
        Self {
            pointer,
            overlay,
            confirm,
            policy,
        }
    }

    async fn clear_overlay(&self) {
        if let Err(e) = self.overlay.clear().await {
            tracing::warn!("Failed to clear overlay: {}", e);
        }
    }

    async fn wait_for_operator(
        &mut self,
        plan: &PlannedMove,
        snapshot: &BoardSnapshot,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Waited, ExecutionError> {
        let policy = self.policy;
        let mut plan = plan.clone();
        let mut snapshot = snapshot.clone();
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
                signal = self.confirm.recv() => {
                    return match signal {
                        Some(()) => Ok(Waited::Play(plan, snapshot)),
                        None => Err(ExecutionError::Cancelled),
                    };
                }
                seen = observe(&plan, &snapshot, ctx) => match seen? {
                    // Played by hand
                    Some(Observation::Confirmed(after)) => {
                        return Ok(Waited::Done(ExecutionResult::Confirmed(after)))
                    }
                    Some(Observation::Changed(after)) => {
                        let held = match policy {
                            SupersedePolicy::Hold => replan(&plan, &snapshot, &after),
                            SupersedePolicy::Supersede => None,
                        };
                        let Some(held) = held else {
                            tracing::info!(uci = %plan.uci, "Position changed, dropping recommendation");
                            return Ok(Waited::Done(ExecutionResult::Superseded(after)));
                        };
                        tracing::debug!(uci = %plan.uci, "Position changed, holding recommendation");
                        plan = held;
                        snapshot = after;
                    }
                    None => {}
                },
            }
        }
    }
}

/// `plan` rebuilt on `after`, if it is still a legal move of ours on the same
/// page and game.
fn replan(plan: &PlannedMove, before: &BoardSnapshot, after: &BoardSnapshot) -> Option<PlannedMove> {
    if after.is_terminal()
        || after.url != before.url
        || !after.is_self_to_move()
        || !after.position.is_legal(plan.mv)
    {
        return None;
    }
    let state = GameState::new(after.clone());
    Some(PlannedMove::new(&state, plan.mv, plan.eval.clone()))
}

#[async_trait]
impl MoveExecutor for ManualExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Manual
    }

    async fn execute(
        &mut self,
        plan: &PlannedMove,
        snapshot: &BoardSnapshot,
        mut ctx: ExecutionContext<'_>,
    ) -> Result<ExecutionResult, ExecutionError> {
        // Key presses from an earlier recommendation do not count
        while self.confirm.try_recv().is_ok() {}

        let (from, to) = resolve(plan, snapshot)?;
        if let Err(e) = self.overlay.show_arrow(from, to, plan.eval.as_deref()).await {
            tracing::warn!("Failed to draw overlay arrow: {}", e);
        }
        tracing::info!(uci = %plan.uci, "Waiting for operator confirmation");

        let waited = self.wait_for_operator(plan, snapshot, &mut ctx).await;
        self.clear_overlay().await;
        match waited? {
            Waited::Done(done) => Ok(done),
            Waited::Play(plan, snapshot) => {
                drag_and_confirm(&self.pointer, 2, &plan, &snapshot, &mut ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::pointer::shared_pointer;
    use crate::executor::tests::{plan, snapshot};
    use crate::snapshot::{GameOverReason, Site};
    use crate::testing::{FakeTable, OverlayEvent, PointerEvent, RecordingOverlay};
    use chess::PieceColor;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Rig {
        table: FakeTable,
        overlay: RecordingOverlay,
        confirm: mpsc::Sender<()>,
        executor: ManualExecutor,
    }

    fn rig(before: &BoardSnapshot, policy: SupersedePolicy) -> Rig {
        let table = FakeTable::new(before.clone());
        let overlay = RecordingOverlay::default();
        let (confirm, rx) = mpsc::channel(1);
        let pointer = PointerDriver::new(shared_pointer(table.pointer()), Duration::ZERO, 2);
        let executor = ManualExecutor::new(pointer, Arc::new(overlay.clone()), rx, policy);
        Rig {
            table,
            overlay,
            confirm,
            executor,
        }
    }

    async fn run(
        rig: &mut Rig,
        plan: &PlannedMove,
        before: &BoardSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut grabber = rig.table.grabber(Site::ChessCom);
        let ctx = ExecutionContext {
            grabber: &mut grabber,
            cancel,
            confirm_polls: 5,
            poll_interval: Duration::from_millis(2),
        };
        rig.executor.execute(plan, before, ctx).await
    }

    #[tokio::test]
    async fn test_confirm_key_plays_move() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        let mut rig = rig(&before, SupersedePolicy::Supersede);
        rig.table.after_own_move(snapshot(PieceColor::White, &["e4"]));

        // A stale press from before the arrow appeared is ignored
        rig.confirm.send(()).await.unwrap();
        let confirm = rig.confirm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = confirm.send(()).await;
        });

        let result = run(&mut rig, &plan, &before, &CancellationToken::new()).await.unwrap();
        assert!(matches!(result, ExecutionResult::Confirmed(_)));

        let overlay = rig.overlay.events();
        assert!(matches!(overlay[0], OverlayEvent::Arrow { ref eval, .. } if eval.as_deref() == Some("+0.30")));
        assert_eq!(overlay.last(), Some(&OverlayEvent::Clear));
        assert!(rig.table.pointer_events().contains(&PointerEvent::Press));
    }

    #[tokio::test]
    async fn test_changed_position_supersedes() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        let mut rig = rig(&before, SupersedePolicy::Supersede);
        rig.table.set(snapshot(PieceColor::White, &["d4"]));

        let result = run(&mut rig, &plan, &before, &CancellationToken::new()).await.unwrap();
        let ExecutionResult::Superseded(after) = result else {
            panic!("expected supersede");
        };
        assert_eq!(after.history, vec!["d2d4"]);
        assert!(rig.table.pointer_events().is_empty());
        assert_eq!(rig.overlay.events().last(), Some(&OverlayEvent::Clear));
    }

    #[tokio::test]
    async fn test_hand_played_move_confirms() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        let mut rig = rig(&before, SupersedePolicy::Hold);
        rig.table.set(snapshot(PieceColor::White, &["e4"]));

        let result = run(&mut rig, &plan, &before, &CancellationToken::new()).await.unwrap();
        assert!(matches!(result, ExecutionResult::Confirmed(_)));
        assert!(rig.table.pointer_events().is_empty());
    }

    #[tokio::test]
    async fn test_hold_replays_move_on_new_position() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        let mut rig = rig(&before, SupersedePolicy::Hold);
        // A resync jumps two plies; e2e4 is still ours and legal
        rig.table.set(snapshot(PieceColor::White, &["Nf3", "Nf6"]));
        rig.table.after_own_move(snapshot(PieceColor::White, &["Nf3", "Nf6", "e4"]));

        let confirm = rig.confirm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let _ = confirm.send(()).await;
        });
        let result = run(&mut rig, &plan, &before, &CancellationToken::new()).await.unwrap();
        let ExecutionResult::Confirmed(after) = result else {
            panic!("expected the held move to be played");
        };
        assert_eq!(after.history, vec!["g1f3", "g8f6", "e2e4"]);
        assert!(rig.table.pointer_events().contains(&PointerEvent::Press));
    }

    #[tokio::test]
    async fn test_hold_drops_arrow_on_finished_game() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        let mut rig = rig(&before, SupersedePolicy::Hold);
        rig.table.set(before.clone().with_terminal(GameOverReason::Resignation));

        let confirm = rig.confirm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let _ = confirm.send(()).await;
        });
        let result = run(&mut rig, &plan, &before, &CancellationToken::new()).await.unwrap();
        let ExecutionResult::Superseded(after) = result else {
            panic!("expected supersede");
        };
        assert!(after.is_terminal());
        assert!(rig.table.pointer_events().is_empty());
    }

    #[tokio::test]
    async fn test_hold_drops_arrow_when_move_is_gone() {
        let (state, plan) = plan(&[], "e2e4");
        let before = state.snapshot().clone();
        let mut rig = rig(&before, SupersedePolicy::Hold);
        rig.table.set(snapshot(PieceColor::White, &["d4"]));

        let result = run(&mut rig, &plan, &before, &CancellationToken::new()).await.unwrap();
        assert!(matches!(result, ExecutionResult::Superseded(_)));
        assert!(rig.table.pointer_events().is_empty());
    }
}
