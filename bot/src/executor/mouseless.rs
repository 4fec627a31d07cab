use async_trait::async_trait;

use super::auto::drag_and_confirm;
use super::{
    await_confirmation, ExecutionContext, ExecutionError, ExecutionMode, ExecutionResult,
    MoveExecutor, PlannedMove, PointerDriver,
};
use crate::snapshot::{BoardSnapshot, PageMode};

/// Applies moves through the page's own scripting. Puzzle pages do not accept
/// injected moves, so they fall back to the pointer.
pub struct MouselessExecutor {
    fallback: PointerDriver,
}

impl MouselessExecutor {
    pub fn new(fallback: PointerDriver) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl MoveExecutor for MouselessExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Mouseless
    }

    async fn execute(
        &mut self,
        plan: &PlannedMove,
        snapshot: &BoardSnapshot,
        mut ctx: ExecutionContext<'_>,
    ) -> Result<ExecutionResult, ExecutionError> {
        if snapshot.mode == PageMode::Puzzle {
            tracing::debug!(uci = %plan.uci, "Puzzle page, using pointer instead of injection");
            return drag_and_confirm(&self.fallback, 2, plan, snapshot, &mut ctx).await;
        }
        if ctx.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let injected = ctx
            .grabber
            .inject_move(&plan.uci, snapshot.ply)
            .await
            .map_err(|e| ExecutionError::InjectionFailed(e.to_string()))?;
        if !injected {
            return Err(ExecutionError::InjectionFailed(
                "page exposes no move primitive".to_string(),
            ));
        }

        // An injection is not repeated: a late confirmation would double-move
        match await_confirmation(plan, snapshot, &mut ctx).await? {
            Some(confirmed) => Ok(ExecutionResult::Confirmed(confirmed)),
            None => Err(ExecutionError::NotConfirmed { attempts: 1 }),
        }
    }
}
