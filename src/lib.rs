//! # ObsKit
//!
//! A Rust-based control engine for astronomy bench instruments speaking
//! line-oriented serial protocols, with support for:
//! - Pegasus-style power boxes (PPB and PPBA variants)
//! - MoonLite-compatible focusers
//! - Serial (USB) and TCP/IP connectivity
//! - Background telemetry polling with field-level change notification
//!
//! ## Architecture
//!
//! ObsKit is organized as a workspace with multiple crates:
//!
//! 1. **obskit-core** - Error taxonomy, telemetry records, diff engine, listeners
//! 2. **obskit-communication** - Transports, command engine, device families
//! 3. **obskit-settings** - Configuration loading and persistence
//! 4. **obskit** - Main binary that integrates all crates
//!
//! ## Features
//!
//! - **Multi-Device Support**: Pegasus power boxes, MoonLite focusers, auto-detection
//! - **Connection Protocols**: Serial/USB, TCP/IP
//! - **Command Engine**: retry with terminator fallback, echo-acknowledged setters
//! - **Telemetry**: schema-validated records, per-field change tracking, poll cycles
//! - **Headless Monitor**: background polling service with structured logging

// Re-export modules for main.rs
pub use obskit_communication::{device, engine, protocol, service, transport};

pub use obskit_core::{
    ChangeSet, CycleReport, DiffEngine, Error, FieldGroup, FieldSchema, ProtocolError,
    QueryFailure, QueryId, ResponseRecord, Result, TelemetryListener, TelemetryListenerHandle,
    TransportError,
};

pub use obskit_communication::{
    detect_device, list_ports, open_transport, Command, CommandExecutor, ConnectionDriver,
    ConnectionParams, DeviceCapabilities, DeviceCommand, DeviceEngine, DeviceKind, DeviceProtocol,
    DewChannel, Focuser, FocuserCommand, MotorCommand, PollCoordinator, PollService,
    PollServiceHandle, PowerBox, PowerBoxCommand, PowerBoxVariant, PowerMetrics, PowerStatus,
    ResponseTerminators, RetryPolicy, SerialParity, SerialPortInfo, Transport,
};

pub use obskit_settings::{
    Config, ConnectionSettings, ConnectionType, DeviceSelection, DeviceSettings, EngineSettings,
    SettingsManager,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
