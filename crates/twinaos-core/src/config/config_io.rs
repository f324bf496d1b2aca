//! Configuration loading and path resolution.
//!
//! Focuses on I/O and filesystem-related helpers for config management.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Config;

/// System-wide config consulted when no per-user file exists.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/twinaos/installer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFailed(String),
    #[error("failed to parse config: {0}")]
    ParseFailed(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("missing $HOME, unable to resolve config directory")]
    MissingHome,
}

impl Config {
    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|err| ConfigError::ReadFailed(err.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|err| ConfigError::ParseFailed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the per-user config, then the system config, then built-in defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Ok(path) if path.exists() => return Self::load_from_path(&path),
            Ok(_) | Err(ConfigError::MissingHome) => {}
            Err(err) => return Err(err),
        }
        let system = Path::new(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Self::load_from_path(system);
        }
        Ok(Self::default())
    }

    /// Return the default config directory based on XDG or $HOME.
    pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg).join("twinaos"));
        }
        let home = env::var("HOME").map_err(|_| ConfigError::MissingHome)?;
        Ok(PathBuf::from(home).join(".config").join("twinaos"))
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::default_config_dir()?.join("installer.toml"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.install.target_root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "install.target_root must be absolute, got {}",
                self.install.target_root.display()
            )));
        }
        if self.install.target_root == Path::new("/") {
            return Err(ConfigError::Invalid(
                "install.target_root must not be the host root".to_string(),
            ));
        }
        if self.commands.timeout_secs == 0 || self.commands.bootstrap_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "command timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
