//! Configuration and settings management for ObsKit
//!
//! Provides configuration file handling, settings management, and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (ports, baud rates, timeouts)
//! - Engine settings (polling period, retry behavior)
//! - Device settings (which family to drive, or auto-detection)

use obskit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connection protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Serial/USB connection
    Serial,
    /// TCP/IP connection
    Tcp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Last used connection type
    pub connection_type: ConnectionType,
    /// Serial port path, or "Auto" to use the first detected port
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Hostname for network connections
    pub host: String,
    /// TCP port for network connections
    pub tcp_port: u16,
    /// Per-attempt read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Serial,
            port: "Auto".to_string(),
            baud_rate: 9600,
            host: "127.0.0.1".to_string(),
            tcp_port: 8888,
            timeout_ms: 3000,
        }
    }
}

/// Device family selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// Try each known family in turn during connect
    Auto,
    /// Pegasus power box
    PowerBox,
    /// MoonLite-compatible focuser
    Focuser,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::PowerBox => write!(f, "powerbox"),
            Self::Focuser => write!(f, "focuser"),
        }
    }
}

/// Device settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Which device family to connect to
    pub family: DeviceSelection,
}

/// Protocol engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Telemetry polling period in milliseconds
    pub polling_period_ms: u64,
    /// Read deadline per command attempt in milliseconds
    pub attempt_timeout_ms: u64,
    /// Attempts per command before giving up
    pub max_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            polling_period_ms: 1000,
            attempt_timeout_ms: 3000,
            max_attempts: 2,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Device selection
    pub device: DeviceSettings,
    /// Protocol engine settings
    pub engine: EngineSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::other(format!("Failed to read config file: {}", e)))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::other(format!("Invalid JSON config: {}", e)))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::other(format!("Invalid TOML config: {}", e)))?
        } else {
            return Err(Error::other(
                "Config file must be .json or .toml".to_string(),
            ));
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::other(format!("Failed to serialize config: {}", e)))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)
                .map_err(|e| Error::other(format!("Failed to serialize config: {}", e)))?
        } else {
            return Err(Error::other(
                "Config file must be .json or .toml".to_string(),
            ));
        };

        std::fs::write(path, content)
            .map_err(|e| Error::other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate connection settings
        if self.connection.timeout_ms == 0 {
            return Err(Error::other("Connection timeout must be > 0".to_string()));
        }

        if self.connection.baud_rate == 0 {
            return Err(Error::other("Baud rate must be > 0".to_string()));
        }

        if self.connection.port.is_empty() {
            return Err(Error::other(
                "Port must be a device path or \"Auto\"".to_string(),
            ));
        }

        if self.connection.connection_type == ConnectionType::Tcp && self.connection.host.is_empty()
        {
            return Err(Error::other(
                "Host must be set for TCP connections".to_string(),
            ));
        }

        // Validate engine settings
        if self.engine.polling_period_ms == 0 {
            return Err(Error::other("Polling period must be > 0".to_string()));
        }

        if self.engine.attempt_timeout_ms == 0 {
            return Err(Error::other("Attempt timeout must be > 0".to_string()));
        }

        if self.engine.max_attempts == 0 {
            return Err(Error::other("Max attempts must be > 0".to_string()));
        }

        Ok(())
    }
}
