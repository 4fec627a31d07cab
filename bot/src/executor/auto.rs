use async_trait::async_trait;

use super::{
    await_confirmation, ExecutionContext, ExecutionError, ExecutionMode, ExecutionResult,
    MoveExecutor, PlannedMove, PointerDriver,
};
use crate::snapshot::BoardSnapshot;

/// Drags pieces with the simulated pointer.
pub struct AutoExecutor {
    pointer: PointerDriver,
    attempts: u32,
}

impl AutoExecutor {
    pub fn new(pointer: PointerDriver) -> Self {
        Self {
            pointer,
            attempts: 2,
        }
    }
}

#[async_trait]
impl MoveExecutor for AutoExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Auto
    }

    async fn execute(
        &mut self,
        plan: &PlannedMove,
        snapshot: &BoardSnapshot,
        mut ctx: ExecutionContext<'_>,
    ) -> Result<ExecutionResult, ExecutionError> {
        drag_and_confirm(&self.pointer, self.attempts, plan, snapshot, &mut ctx).await
    }
}

/// Drag, then wait for the page to show the move; one retry by default.
pub(crate) async fn drag_and_confirm(
    pointer: &PointerDriver,
    attempts: u32,
    plan: &PlannedMove,
    snapshot: &BoardSnapshot,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, ExecutionError> {
    for attempt in 1..=attempts {
        pointer.play(plan, snapshot, ctx.cancel).await?;
        if let Some(confirmed) = await_confirmation(plan, snapshot, ctx).await? {
            return Ok(ExecutionResult::Confirmed(confirmed));
        }
        tracing::warn!(uci = %plan.uci, attempt, "Move did not show on the board");
    }
    Err(ExecutionError::NotConfirmed { attempts })
}
