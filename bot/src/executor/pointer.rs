//! Eased pointer drags over a shared input device.

use chess::PieceColor;
use cozy_chess::{Piece, Rank, Square};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{square_center, ExecutionError, PlannedMove};
use crate::page::{Point, PointerDevice};
use crate::snapshot::BoardSnapshot;

/// The one input device, shared by whichever executor is running.
pub type SharedPointer = Arc<Mutex<Box<dyn PointerDevice>>>;

pub fn shared_pointer(device: impl PointerDevice + 'static) -> SharedPointer {
    Arc::new(Mutex::new(Box::new(device)))
}

pub struct PointerDriver {
    device: SharedPointer,
    /// Pause after pressing, before the drag starts.
    latency: Duration,
    steps: u32,
    step_pause: Duration,
}

impl PointerDriver {
    pub fn new(device: SharedPointer, latency: Duration, steps: u32) -> Self {
        Self {
            device,
            latency,
            steps: steps.max(1),
            step_pause: Duration::from_millis(8),
        }
    }

    /// Press at `from`, ease to `to`, release. Cancellation is checked before
    /// every step; a cancelled drag still releases the button.
    pub async fn drag(
        &self,
        from: Point,
        to: Point,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let mut device = self.device.lock().await;
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        device.move_to(from).await?;
        device.press().await?;
        device.pause(self.latency).await;

        let moved = self.ease(&mut **device, from, to, cancel).await;
        let released = device.release().await;
        moved?;
        released?;
        Ok(())
    }

    /// The drag itself, with the button held.
    async fn ease(
        &self,
        device: &mut dyn PointerDevice,
        from: Point,
        to: Point,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        for step in 1..=self.steps {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            let t = smoothstep(f64::from(step) / f64::from(self.steps));
            device.move_to(from.lerp(to, t)).await?;
            device.pause(self.step_pause).await;
        }
        Ok(())
    }

    pub async fn click(&self, at: Point, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        let mut device = self.device.lock().await;
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        device.click(at).await?;
        Ok(())
    }

    /// Drag `plan` on the board in `snapshot`, then pick the promotion piece.
    pub async fn play(
        &self,
        plan: &PlannedMove,
        snapshot: &BoardSnapshot,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let (from, to) = super::resolve(plan, snapshot)?;
        tracing::debug!(uci = %plan.uci, ?from, ?to, "Dragging piece");
        self.drag(from, to, cancel).await?;

        if let Some(piece) = plan.promotion {
            let Some(rect) = snapshot.board_rect else {
                return Err(ExecutionError::Unresolvable("board position unknown".to_string()));
            };
            let square = promotion_square(plan.to, snapshot.player, piece)?;
            self.device.lock().await.pause(Duration::from_millis(100)).await;
            self.click(square_center(&rect, snapshot.player, square), cancel).await?;
        }
        Ok(())
    }
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Square of `piece` in the promotion picker: queen on the destination, then
/// knight, rook, bishop toward the centre of the board.
fn promotion_square(to: Square, mover: PieceColor, piece: Piece) -> Result<Square, ExecutionError> {
    let offset = match piece {
        Piece::Queen => 0,
        Piece::Knight => 1,
        Piece::Rook => 2,
        Piece::Bishop => 3,
        other => {
            return Err(ExecutionError::Unresolvable(format!(
                "cannot promote to {:?}",
                other
            )))
        }
    };
    let rank = to.rank() as i32;
    let rank = match mover {
        PieceColor::White => rank - offset,
        PieceColor::Black => rank + offset,
    };
    let rank = usize::try_from(rank)
        .ok()
        .filter(|r| *r < 8)
        .ok_or_else(|| ExecutionError::Unresolvable("promotion picker off the board".to_string()))?;
    Ok(Square::new(to.file(), Rank::index(rank)))
}
