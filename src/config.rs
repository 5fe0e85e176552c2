//! REPL configuration: built-in defaults, an optional TOML file, then the
//! environment. Command-line flags are applied on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

const HISTORY_FILE: &str = ".stackrepl_history";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    pub prompt: String,
    pub paste_prompt: String,
    /// Keep and persist input history
    pub history: bool,
    pub history_file: Option<PathBuf>,
    pub history_max: usize,
    /// VM memory in bytes
    pub memory_size: usize,
    /// Bound on the stored last-error message
    pub line_buffer_size: usize,
    pub color: bool,
    /// Default tracing filter when `STACKREPL_LOG` is unset
    pub log_level: String,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            paste_prompt: "... ".to_string(),
            history: true,
            history_file: default_history_path(),
            history_max: 1000,
            memory_size: 16 * 1024,
            line_buffer_size: 512,
            color: true,
            log_level: "warn".to_string(),
        }
    }
}

fn default_history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

impl ReplConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stackrepl").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location if it
    /// exists, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("STACKREPL_HISTORY_FILE").filter(|v| !v.is_empty()) {
            self.history_file = Some(PathBuf::from(path));
        }
        if let Some(value) = var("STACKREPL_MEMORY") {
            self.memory_size = parse_size("STACKREPL_MEMORY", &value)?;
        }
        if let Some(level) = var("STACKREPL_LOG").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        if var("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            self.color = false;
        }
        Ok(())
    }
}

/// Parse a positive byte count, decimal or `0x` hexadecimal.
pub fn parse_size(key: &str, value: &str) -> Result<usize, ConfigError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => trimmed.parse::<usize>().ok(),
    };

    parsed
        .filter(|&size| size > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
