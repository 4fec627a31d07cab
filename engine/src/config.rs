use serde::{Deserialize, Serialize};
use std::fmt;

/// Search depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DepthRepr", into = "DepthRepr")]
pub enum Depth {
    Limited(u8),
    /// Search is bounded by move time only.
    Unbounded,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DepthRepr {
    Plies(u8),
    Word(String),
}

impl TryFrom<DepthRepr> for Depth {
    type Error = String;

    fn try_from(repr: DepthRepr) -> Result<Self, Self::Error> {
        match repr {
            DepthRepr::Plies(n) => Ok(Depth::Limited(n)),
            DepthRepr::Word(w) if w.eq_ignore_ascii_case("unbounded") => Ok(Depth::Unbounded),
            DepthRepr::Word(w) => Err(format!("invalid depth '{}'", w)),
        }
    }
}

impl From<Depth> for DepthRepr {
    fn from(depth: Depth) -> Self {
        match depth {
            Depth::Limited(n) => DepthRepr::Plies(n),
            Depth::Unbounded => DepthRepr::Word("unbounded".to_string()),
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Limited(n) => write!(f, "{}", n),
            Depth::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl std::str::FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Depth::Unbounded);
        }
        s.parse::<u8>()
            .map(Depth::Limited)
            .map_err(|_| format!("invalid depth '{}'", s))
    }
}

pub const MAX_SKILL_LEVEL: u8 = 20;

/// Engine tuning, owned by the caller and handed to the manager by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub depth: Depth,
    pub skill_level: u8,
    pub hash_mb: u32,
    pub threads: u32,
    /// Stockfish "Slow Mover" percentage.
    pub slow_mover: u32,
    /// Search time used when depth is unbounded.
    pub move_time_ms: u64,
    pub ponder: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depth: Depth::Limited(8),
            skill_level: MAX_SKILL_LEVEL,
            hash_mb: 64,
            threads: 1,
            slow_mover: 100,
            move_time_ms: 1000,
            ponder: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineConfigError {
    #[error("depth must be at least 1")]
    ZeroDepth,
    #[error("skill level {0} is outside 0..=20")]
    SkillOutOfRange(u8),
    #[error("hash size must be at least 1 MB")]
    ZeroHash,
    #[error("thread count {requested} is outside 1..={available}")]
    ThreadsOutOfRange { requested: u32, available: u32 },
    #[error("move time must be positive when depth is unbounded")]
    ZeroMoveTime,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.depth == Depth::Limited(0) {
            return Err(EngineConfigError::ZeroDepth);
        }
        if self.skill_level > MAX_SKILL_LEVEL {
            return Err(EngineConfigError::SkillOutOfRange(self.skill_level));
        }
        if self.hash_mb == 0 {
            return Err(EngineConfigError::ZeroHash);
        }
        let available = available_cores();
        if self.threads == 0 || self.threads > available {
            return Err(EngineConfigError::ThreadsOutOfRange {
                requested: self.threads,
                available,
            });
        }
        if self.depth == Depth::Unbounded && self.move_time_ms == 0 {
            return Err(EngineConfigError::ZeroMoveTime);
        }
        Ok(())
    }

    /// Hash, threads and ponder cannot be changed on a live process.
    pub fn requires_restart(&self, other: &EngineConfig) -> bool {
        self.hash_mb != other.hash_mb
            || self.threads != other.threads
            || self.ponder != other.ponder
    }

    /// Options applied once after the handshake.
    pub fn startup_options(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Threads", self.threads.to_string()),
            ("Hash", self.hash_mb.to_string()),
            ("Ponder", self.ponder.to_string()),
            ("UCI_ShowWDL", "true".to_string()),
        ]
    }

    /// Options that may change between searches.
    pub fn live_options(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Skill Level", self.skill_level.to_string()),
            ("Slow Mover", self.slow_mover.to_string()),
        ]
    }
}

pub fn available_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig {
            depth: Depth::Limited(0),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(EngineConfigError::ZeroDepth));

        config.depth = Depth::Unbounded;
        config.skill_level = 21;
        assert_eq!(config.validate(), Err(EngineConfigError::SkillOutOfRange(21)));

        config.skill_level = 10;
        config.hash_mb = 0;
        assert_eq!(config.validate(), Err(EngineConfigError::ZeroHash));

        config.hash_mb = 16;
        config.threads = available_cores() + 1;
        assert!(matches!(
            config.validate(),
            Err(EngineConfigError::ThreadsOutOfRange { .. })
        ));
    }

    #[test]
    fn test_requires_restart_only_for_process_options() {
        let base = EngineConfig::default();
        let live = EngineConfig {
            skill_level: 3,
            depth: Depth::Unbounded,
            slow_mover: 50,
            ..base.clone()
        };
        assert!(!base.requires_restart(&live));

        let hash = EngineConfig {
            hash_mb: 256,
            ..base.clone()
        };
        assert!(base.requires_restart(&hash));
    }

    #[test]
    fn test_depth_serde_repr() {
        assert_eq!(serde_json::to_string(&Depth::Limited(12)).unwrap(), "12");
        assert_eq!(serde_json::to_string(&Depth::Unbounded).unwrap(), "\"unbounded\"");
        let parsed: Depth = serde_json::from_str("\"unbounded\"").unwrap();
        assert_eq!(parsed, Depth::Unbounded);
        assert!(serde_json::from_str::<Depth>("\"deep\"").is_err());
        assert_eq!("15".parse::<Depth>(), Ok(Depth::Limited(15)));
    }
}
