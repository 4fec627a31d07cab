use crate::{EngineError, EngineInfo, Score, Wdl};
use chess::{convert_uci_castling_to_cozy, format_uci_move};
use cozy_chess::{Board, Move};

/// Win/draw/loss in percent, side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WdlPercent {
    pub win: f32,
    pub draw: f32,
    pub loss: f32,
}

impl From<Wdl> for WdlPercent {
    fn from(wdl: Wdl) -> Self {
        let total = (wdl.win + wdl.draw + wdl.loss).max(1) as f32;
        Self {
            win: wdl.win as f32 * 100.0 / total,
            draw: wdl.draw as f32 * 100.0 / total,
            loss: wdl.loss as f32 * 100.0 / total,
        }
    }
}

impl WdlPercent {
    pub fn flipped(self) -> Self {
        Self {
            win: self.loss,
            draw: self.draw,
            loss: self.win,
        }
    }

    pub fn display(&self) -> String {
        format!("{:.0}/{:.0}/{:.0}", self.win, self.draw, self.loss)
    }
}

/// Result of one analysis call.
#[derive(Debug, Clone)]
pub struct EngineEvaluation {
    /// Legal on the analysed board, in cozy-chess encoding.
    pub best_move: Move,
    /// `best_move` in standard UCI text.
    pub best_move_uci: String,
    pub ponder: Option<Move>,
    /// Principal variation as the engine printed it (standard UCI).
    pub pv: Vec<Move>,
    pub score: Option<Score>,
    pub wdl: Option<WdlPercent>,
    pub depth: Option<u8>,
}

impl EngineEvaluation {
    /// How hard the position looks, in `0.0..=1.0`.
    ///
    /// Balanced positions score high; decided ones (large advantage, forced
    /// mate) score low.
    pub fn complexity(&self) -> f64 {
        match self.score {
            Some(Score::Mate(_)) => 0.1,
            Some(Score::Centipawns(cp)) => {
                let decided = f64::from(cp.unsigned_abs().min(600)) / 600.0;
                (1.0 - decided).max(0.1)
            }
            None => 0.5,
        }
    }

    /// The opponent reply the engine expects, standard UCI.
    pub fn predicted_reply(&self) -> Option<String> {
        self.pv.get(1).or(self.ponder.as_ref()).map(|mv| format_uci_move(*mv))
    }
}

/// Collects `info` lines of one search.
#[derive(Debug, Default)]
pub(crate) struct SearchProgress {
    depth: Option<u8>,
    score: Option<Score>,
    wdl: Option<Wdl>,
    pv: Vec<Move>,
}

impl SearchProgress {
    pub(crate) fn absorb(&mut self, info: EngineInfo) {
        // Only the main line is tracked
        if info.multipv.is_some_and(|n| n > 1) {
            return;
        }
        if info.depth.is_some() {
            self.depth = info.depth;
        }
        if info.score.is_some() {
            self.score = info.score;
        }
        if info.wdl.is_some() {
            self.wdl = info.wdl;
        }
        if !info.pv.is_empty() {
            self.pv = info.pv;
        }
    }

    pub(crate) fn finish(
        self,
        board: &Board,
        best: Option<Move>,
        ponder: Option<Move>,
    ) -> Result<EngineEvaluation, EngineError> {
        let raw = best.ok_or_else(|| {
            EngineError::InvalidResponse("engine returned no move".to_string())
        })?;

        let mut legal = Vec::new();
        board.generate_moves(|mvs| {
            legal.extend(mvs);
            false
        });
        let best_move = convert_uci_castling_to_cozy(raw, &legal);
        if !legal.contains(&best_move) {
            return Err(EngineError::InvalidResponse(format!(
                "illegal best move {}",
                format_uci_move(raw)
            )));
        }

        Ok(EngineEvaluation {
            best_move,
            best_move_uci: format_uci_move(raw),
            ponder,
            pv: self.pv,
            score: self.score,
            wdl: self.wdl.map(WdlPercent::from),
            depth: self.depth,
        })
    }
}
