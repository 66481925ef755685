//! Headless monitor binary.
//!
//! Loads the configuration, opens the configured transport, connects to the
//! selected device family (or auto-detects one), then polls telemetry in the
//! background until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use obskit::device::{focuser, powerbox};
use obskit::{
    init_logging, list_ports, open_transport, ChangeSet, Config, ConnectionDriver,
    ConnectionParams, ConnectionType, CycleReport, DeviceEngine, DeviceProtocol, DeviceSelection,
    Focuser, PollService, PowerBox, PowerMetrics, PowerStatus, QueryId, ResponseRecord,
    RetryPolicy, SettingsManager, TelemetryListener, BUILD_DATE, VERSION,
};

/// Renders polled telemetry as log lines.
///
/// Records are decoded into typed views where a family helper exists, so
/// monitor output reads as instrument state rather than raw field dumps.
/// Quiet unless something changed.
struct LoggingListener;

#[async_trait]
impl TelemetryListener for LoggingListener {
    async fn on_connected(&self, device: &str) {
        info!("Connected to {}", device);
    }

    async fn on_disconnected(&self) {
        info!("Disconnected");
    }

    async fn on_poll_result(&self, query: QueryId, record: &ResponseRecord, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        match query.as_str() {
            "PA" => {
                if let Some(status) = PowerStatus::from_record(record) {
                    info!(
                        "Power: ports {:?}, {:.1}C, {:.2}A, {:.0}% RH, dew {}/{}",
                        status.ports,
                        status.temperature,
                        status.current,
                        status.humidity,
                        status.dew_duty_a,
                        status.dew_duty_b
                    );
                    if status.power_warning {
                        warn!("Device reports a power warning");
                    }
                }
            }
            "PC" => {
                if let Some(metrics) = PowerMetrics::from_record(record) {
                    info!(
                        "Currents: total {:.2}A, quad {:.2}A, dew {:.2}A/{:.2}A, up {:.3}h",
                        metrics.total_current,
                        metrics.quad_current,
                        metrics.dew_a_current,
                        metrics.dew_b_current,
                        metrics.uptime_hours
                    );
                }
            }
            "XS:2" => {
                if let Some(position) = powerbox::motor_value(record) {
                    info!("Motor position: {}", position);
                }
            }
            ":GP" => {
                if let Some(position) = focuser::parse_position(record) {
                    info!("Focuser position: {}", position);
                }
            }
            ":GI" => {
                if let Some(moving) = focuser::parse_moving(record) {
                    info!("Focuser {}", if moving { "moving" } else { "idle" });
                }
            }
            ":GT" => {
                if let Some(temperature) = focuser::parse_temperature(record) {
                    info!("Focuser temperature: {:.1}C", temperature);
                }
            }
            _ => {
                info!("{} changed: {}", query, changes.groups.join(", "));
            }
        }
    }

    async fn on_query_error(&self, query: QueryId, message: &str) {
        warn!("{} failed: {}", query, message);
    }

    async fn on_cycle_complete(&self, report: &CycleReport) {
        debug!("cycle {}", report.to_json());
    }
}

/// Target endpoint rendered for the startup log line
fn describe_endpoint(config: &Config) -> String {
    match config.connection.connection_type {
        ConnectionType::Serial => config.connection.port.clone(),
        ConnectionType::Tcp => {
            format!("{}:{}", config.connection.host, config.connection.tcp_port)
        }
    }
}

/// Build transport parameters from the configuration.
///
/// A serial port of "Auto" resolves to the first detected instrument port.
fn connection_params(config: &Config) -> anyhow::Result<ConnectionParams> {
    let connection = &config.connection;
    let driver = match connection.connection_type {
        ConnectionType::Serial => ConnectionDriver::Serial,
        ConnectionType::Tcp => ConnectionDriver::Tcp,
    };

    let port = if driver == ConnectionDriver::Serial && connection.port.eq_ignore_ascii_case("auto")
    {
        let ports = list_ports().context("Failed to enumerate serial ports")?;
        let first = ports
            .first()
            .context("No serial ports detected; set connection.port in the config")?;
        info!("Auto-selected serial port {}", first.port_name);
        first.port_name.clone()
    } else {
        connection.port.clone()
    };

    Ok(ConnectionParams {
        driver,
        port,
        baud_rate: connection.baud_rate,
        host: connection.host.clone(),
        tcp_port: connection.tcp_port,
        timeout_ms: connection.timeout_ms,
        ..ConnectionParams::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    info!("ObsKit {} (built {})", VERSION, BUILD_DATE);

    let manager = SettingsManager::load_or_default().context("Failed to load configuration")?;
    if !manager.path().exists() {
        // First run: write the defaults out so there is a file to edit
        if let Err(e) = manager.save() {
            warn!(
                "Could not write default config to {}: {}",
                manager.path().display(),
                e
            );
        }
    }
    let config = manager.config().clone();
    info!(
        "Connecting via {} to {}, device family: {}",
        config.connection.connection_type,
        describe_endpoint(&config),
        config.device.family
    );

    let params = connection_params(&config)?;
    let transport = match open_transport(&params) {
        Ok(transport) => transport,
        Err(e) => {
            if params.driver == ConnectionDriver::Serial {
                if let Ok(ports) = list_ports() {
                    let names: Vec<String> =
                        ports.iter().map(|p| p.port_name.clone()).collect();
                    warn!("Available ports: {}", names.join(", "));
                }
            }
            return Err(e).with_context(|| format!("Failed to open {}", params.port));
        }
    };

    let policy = RetryPolicy {
        max_attempts: config.engine.max_attempts,
        attempt_timeout: Duration::from_millis(config.engine.attempt_timeout_ms),
    };

    let initial_family: Box<dyn DeviceProtocol> = match config.device.family {
        DeviceSelection::Focuser => Box::new(Focuser::new()),
        _ => Box::new(PowerBox::new()),
    };
    let mut engine = DeviceEngine::new(initial_family, policy);
    engine.register_listener(Arc::new(LoggingListener));

    match config.device.family {
        DeviceSelection::Auto => {
            let candidates: Vec<Box<dyn DeviceProtocol>> =
                vec![Box::new(PowerBox::new()), Box::new(Focuser::new())];
            engine
                .connect_detecting(transport, candidates)
                .await
                .context("No supported device answered")?;
        }
        _ => {
            engine
                .connect(transport)
                .await
                .context("Device handshake failed")?;
        }
    }

    let handle = PollService::spawn(engine, Duration::from_millis(config.engine.polling_period_ms));
    info!(
        "Polling every {}ms; press Ctrl+C to stop",
        config.engine.polling_period_ms
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    handle.shutdown().await;

    Ok(())
}
