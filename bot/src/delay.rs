//! Human-like think time before a move is played.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Think time is sampled from `[minimum_ms, minimum_ms + jitter_ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySpec {
    pub minimum_ms: u64,
    pub jitter_ms: u64,
}

impl Default for DelaySpec {
    fn default() -> Self {
        Self {
            minimum_ms: 0,
            jitter_ms: 5000,
        }
    }
}

impl DelaySpec {
    pub fn maximum(&self) -> Duration {
        Duration::from_millis(self.minimum_ms.saturating_add(self.jitter_ms))
    }
}

/// Sample a think time. `complexity` in `0.0..=1.0` skews the sample: hard
/// positions tend toward the long end, decided ones toward the short end.
pub fn compute_think_time(spec: &DelaySpec, complexity: f64) -> Duration {
    compute_think_time_with(&mut rand::thread_rng(), spec, complexity)
}

pub fn compute_think_time_with<R: Rng + ?Sized>(
    rng: &mut R,
    spec: &DelaySpec,
    complexity: f64,
) -> Duration {
    let minimum = Duration::from_millis(spec.minimum_ms);
    if spec.jitter_ms == 0 {
        return minimum;
    }

    let complexity = if complexity.is_finite() {
        complexity.clamp(0.0, 1.0)
    } else {
        0.5
    };
    // Exponent in 0.5..=2.0: below 1 pushes samples up, above 1 pulls them down
    let exponent = 2.0 - 1.5 * complexity;
    let fraction = rng.gen::<f64>().powf(exponent);

    let jitter = Duration::from_secs_f64(spec.jitter_ms as f64 * fraction / 1000.0);
    (minimum + jitter).min(spec.maximum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_jitter_returns_minimum() {
        let spec = DelaySpec {
            minimum_ms: 750,
            jitter_ms: 0,
        };
        assert_eq!(compute_think_time(&spec, 0.3), Duration::from_millis(750));
    }

    #[test]
    fn test_samples_vary() {
        let spec = DelaySpec {
            minimum_ms: 100,
            jitter_ms: 400,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<_> = (0..50)
            .map(|_| compute_think_time_with(&mut rng, &spec, 0.5))
            .collect();
        assert!(samples.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_complexity_skews_mean() {
        let spec = DelaySpec {
            minimum_ms: 0,
            jitter_ms: 1000,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mean = |rng: &mut StdRng, complexity: f64| {
            (0..2000)
                .map(|_| compute_think_time_with(rng, &spec, complexity).as_secs_f64())
                .sum::<f64>()
                / 2000.0
        };
        let easy = mean(&mut rng, 0.0);
        let hard = mean(&mut rng, 1.0);
        assert!(hard > easy, "hard {hard} should exceed easy {easy}");
    }

    proptest! {
        #[test]
        fn prop_think_time_within_bounds(
            minimum_ms in 0u64..10_000,
            jitter_ms in 0u64..10_000,
            complexity in proptest::num::f64::ANY,
            seed in any::<u64>(),
        ) {
            let spec = DelaySpec { minimum_ms, jitter_ms };
            let mut rng = StdRng::seed_from_u64(seed);
            let delay = compute_think_time_with(&mut rng, &spec, complexity);
            prop_assert!(delay >= Duration::from_millis(minimum_ms));
            prop_assert!(delay <= spec.maximum());
        }
    }
}
