//! Evaluation summaries broadcast after each accepted ply.

use chess::{PieceColor, Placement};
use engine::{EngineEvaluation, Score};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    /// Engine score from the player's side, e.g. `+0.35` or `M3`.
    pub score: Option<String>,
    /// Win/draw/loss percentages from the player's side.
    pub wdl: Option<String>,
    /// Material difference in pawns from the player's side, e.g. `+2`.
    pub material: String,
    /// Percentage of own moves that matched the engine's choice.
    pub bot_accuracy: Option<f64>,
    /// Percentage of opponent moves the engine predicted.
    pub opponent_prediction: Option<f64>,
    /// Player's expected share in `0.0..=1.0`.
    pub eval_bar: Option<f64>,
}

/// Move-matching counters for one game.
#[derive(Debug, Clone, Default)]
pub struct GameStats {
    own_moves: u32,
    own_best: u32,
    opponent_moves: u32,
    opponent_predicted: u32,
    expected_reply: Option<String>,
}

impl GameStats {
    /// Record one of our moves. `best` is the engine's choice, when it was asked.
    pub fn record_own(&mut self, played: &str, best: Option<&str>, predicted_reply: Option<String>) {
        if let Some(best) = best {
            self.own_moves += 1;
            if played == best {
                self.own_best += 1;
            }
        }
        self.expected_reply = predicted_reply;
    }

    pub fn record_opponent(&mut self, played: &str) {
        if let Some(expected) = self.expected_reply.take() {
            self.opponent_moves += 1;
            if expected == played {
                self.opponent_predicted += 1;
            }
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        percentage(self.own_best, self.own_moves)
    }

    pub fn prediction_rate(&self) -> Option<f64> {
        percentage(self.opponent_predicted, self.opponent_moves)
    }
}

fn percentage(hits: u32, total: u32) -> Option<f64> {
    (total > 0).then(|| f64::from(hits) * 100.0 / f64::from(total))
}

/// Build a report for `player`. `evaluated_side` is the side to move in the
/// position `evaluation` was computed for.
pub fn build_report(
    evaluation: Option<&EngineEvaluation>,
    evaluated_side: PieceColor,
    player: PieceColor,
    placement: &Placement,
    stats: &GameStats,
) -> EvalReport {
    let flip = evaluated_side != player;
    let score = evaluation
        .and_then(|e| e.score)
        .map(|s| if flip { s.negate() } else { s });
    let wdl = evaluation
        .and_then(|e| e.wdl)
        .map(|w| if flip { w.flipped() } else { w });

    let balance = match player {
        PieceColor::White => placement.material_balance(),
        PieceColor::Black => -placement.material_balance(),
    };

    let eval_bar = match (wdl, score) {
        (Some(wdl), _) => Some(f64::from(wdl.win + wdl.draw / 2.0) / 100.0),
        (None, Some(score)) => Some(expected_share(score)),
        (None, None) => None,
    };

    EvalReport {
        score: score.map(|s| s.display()),
        wdl: wdl.map(|w| w.display()),
        material: format!("{:+}", balance),
        bot_accuracy: stats.accuracy(),
        opponent_prediction: stats.prediction_rate(),
        eval_bar,
    }
}

/// Logistic mapping of a score onto the expected share.
fn expected_share(score: Score) -> f64 {
    let cp = f64::from(score.to_cp().clamp(-4000, 4000));
    1.0 / (1.0 + 10f64.powf(-cp / 400.0))
}
