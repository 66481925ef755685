//! Settings manager
//!
//! Owns the active configuration and the on-disk location it loads from and
//! saves to.

use obskit_core::{Error, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Directory name under the platform config directory
const CONFIG_DIR_NAME: &str = "obskit";
/// Default config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Owns the active configuration and its path
#[derive(Debug, Clone)]
pub struct SettingsManager {
    config: Config,
    path: PathBuf,
}

impl SettingsManager {
    /// Default config path under the platform config directory
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Create the config directory if it does not exist
    pub fn ensure_config_dir() -> Result<()> {
        let path = Self::default_config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::other(format!("Failed to create config directory: {}", e)))?;
        }
        Ok(())
    }

    /// Load from the default path, or start with defaults when no file exists
    pub fn load_or_default() -> Result<Self> {
        Self::load_or_default_from(Self::default_config_path())
    }

    /// Load from a specific path, or start with defaults when no file exists
    ///
    /// A file that exists but fails to parse or validate is an error, not a
    /// silent fallback to defaults.
    pub fn load_or_default_from(path: PathBuf) -> Result<Self> {
        let config = if path.exists() {
            Config::load_from_file(&path)?
        } else {
            Config::default()
        };
        Ok(Self { config, path })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access for callers that edit settings before saving
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Path the configuration loads from and saves to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save the configuration to its path, creating parent directories first
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::other(format!("Failed to create config directory: {}", e)))?;
        }
        self.config.save_to_file(&self.path)
    }
}
