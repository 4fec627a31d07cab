//! The persisted bot configuration.
//!
//! Lives in the platform config directory as `config.json`. The directory can
//! be moved with `PAWNBOT_CONFIG_DIR`. A missing file means defaults.

use bot::{BotConfig, ConfigError};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no config directory could be determined for this platform")]
    NoConfigDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Invalid { path: PathBuf, source: ConfigError },
}

/// Get the directory holding the settings file.
///
/// Priority:
/// 1. `PAWNBOT_CONFIG_DIR` env variable if set
/// 2. The platform config directory for pawnbot
pub fn config_dir() -> Result<PathBuf, SettingsError> {
    if let Ok(dir) = std::env::var("PAWNBOT_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "pawnbot")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(SettingsError::NoConfigDir)
}

pub fn config_path() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Read and validate the settings at `path`; defaults when it does not exist.
pub fn load_from(path: &Path) -> Result<BotConfig, SettingsError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(BotConfig::default());
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let config: BotConfig = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate().map_err(|source| SettingsError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config)
}

pub fn save_to(path: &Path, config: &BotConfig) -> Result<(), SettingsError> {
    let io = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bot::{ExecutionMode, Site};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, BotConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = BotConfig {
            site: Site::ChessCom,
            mode: ExecutionMode::Manual,
            non_stop_puzzles: true,
            ..Default::default()
        };
        save_to(&path, &config).unwrap();
        assert_eq!(load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "poll_interval_ms": 0 }"#).unwrap();
        assert!(matches!(load_from(&path), Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_from(&path), Err(SettingsError::Parse { .. })));
    }
}
