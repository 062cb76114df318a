//! Daemon configuration, loaded from TOML.
//!
//! Resolution order for every setting: CLI flag, then config file, then
//! built-in default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Daemon configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Socket path override.
    pub socket_path: Option<PathBuf>,
    /// Shell to spawn in new sessions (overrides $SHELL).
    pub shell: Option<String>,
    /// Shut the daemon down when the last client disconnects.
    #[serde(default)]
    pub exit_on_idle: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config {0}: {1}")]
    ParseFailed(PathBuf, #[source] toml::de::Error),
}

impl Config {
    /// Load config from a TOML file. Returns `None` if the file does not
    /// exist; a file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Default config file location:
    /// `$XDG_CONFIG_HOME/prise/config.toml`, falling back to
    /// `~/.config/prise/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            if !dir.is_empty() {
                return Some(PathBuf::from(dir).join("prise").join("config.toml"));
            }
        }
        std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("prise")
                .join("config.toml")
        })
    }
}
