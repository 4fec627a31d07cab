//! Session configuration.
//!
//! One serde document covers the whole bot; the binary persists it as JSON and
//! overlays command-line flags for a single run.

use engine::{EngineConfig, EngineConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::delay::DelaySpec;
use crate::executor::{ExecutionMode, SupersedePolicy};
use crate::snapshot::Site;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub spec: DelaySpec,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            spec: DelaySpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub site: Site,
    pub mode: ExecutionMode,
    pub engine: EngineConfig,
    /// Engine binary; searched for when unset.
    pub engine_path: Option<PathBuf>,
    pub delay: DelaySettings,
    pub non_stop_puzzles: bool,
    pub non_stop_matches: bool,
    pub poll_interval_ms: u64,
    pub non_stop_poll_interval_ms: u64,
    /// Pause between pressing on the source square and starting the drag.
    pub mouse_latency_ms: u64,
    pub pointer_steps: u32,
    pub bongcloud: bool,
    /// Polls to wait for an executed move to show before retrying.
    pub confirm_polls: u32,
    /// Consecutive failed polls tolerated before backing off further.
    pub grabber_retries: u32,
    /// Consecutive schema mismatches after which the session fails.
    pub schema_mismatch_budget: u32,
    pub manual_policy: SupersedePolicy,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            site: Site::Lichess,
            mode: ExecutionMode::Auto,
            engine: EngineConfig::default(),
            engine_path: None,
            delay: DelaySettings::default(),
            non_stop_puzzles: false,
            non_stop_matches: false,
            poll_interval_ms: 300,
            non_stop_poll_interval_ms: 2000,
            mouse_latency_ms: 0,
            pointer_steps: 12,
            bongcloud: false,
            confirm_polls: 10,
            grabber_retries: 3,
            schema_mismatch_budget: 20,
            manual_policy: SupersedePolicy::Supersede,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Engine(#[from] EngineConfigError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        let positive = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("non_stop_poll_interval_ms", self.non_stop_poll_interval_ms),
            ("pointer_steps", u64::from(self.pointer_steps)),
            ("confirm_polls", u64::from(self.confirm_polls)),
            ("schema_mismatch_budget", u64::from(self.schema_mismatch_budget)),
        ];
        match positive.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Zero(name)),
            None => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn non_stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.non_stop_poll_interval_ms)
    }

    pub fn mouse_latency(&self) -> Duration {
        Duration::from_millis(self.mouse_latency_ms)
    }

    pub fn non_stop(&self) -> bool {
        self.non_stop_puzzles || self.non_stop_matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::Depth;

    #[test]
    fn test_defaults_validate() {
        assert_eq!(BotConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let config = BotConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("poll_interval_ms")));
    }

    #[test]
    fn test_rejects_bad_engine_values() {
        let mut config = BotConfig::default();
        config.engine.depth = Depth::Limited(0);
        assert!(matches!(config.validate(), Err(ConfigError::Engine(_))));

        let mut config = BotConfig::default();
        config.engine.skill_level = 21;
        assert!(matches!(config.validate(), Err(ConfigError::Engine(_))));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: BotConfig = serde_json::from_str(
            r#"{ "site": "chesscom", "mode": "mouseless", "delay": { "enabled": true, "minimum_ms": 500 },
                 "engine": { "depth": "unbounded", "threads": 1 } }"#,
        )
        .unwrap();
        assert_eq!(config.site, Site::ChessCom);
        assert_eq!(config.mode, ExecutionMode::Mouseless);
        assert!(config.delay.enabled);
        assert_eq!(config.delay.spec.minimum_ms, 500);
        assert_eq!(config.delay.spec.jitter_ms, 5000);
        assert_eq!(config.engine.depth, Depth::Unbounded);
        assert_eq!(config.poll_interval_ms, 300);
    }

    #[test]
    fn test_json_roundtrip_keeps_policy() {
        let config = BotConfig {
            manual_policy: SupersedePolicy::Hold,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
