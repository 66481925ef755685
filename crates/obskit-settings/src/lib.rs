//! ObsKit Settings Crate
//!
//! Handles application configuration and settings persistence.

pub mod config;
pub mod manager;

pub use config::{
    Config, ConnectionSettings, ConnectionType, DeviceSelection, DeviceSettings, EngineSettings,
};
pub use manager::SettingsManager;
