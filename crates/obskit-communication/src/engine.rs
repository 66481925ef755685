//! Device engine
//!
//! A [`DeviceEngine`] ties one transport, one device family, and one poll
//! coordinator together and owns the listener registry. It is the single
//! entry point callers use: connect, apply commands, tick the poll loop,
//! disconnect.
//!
//! Listener notification is sequential and awaited, so a slow listener
//! delays the cycle rather than being skipped.

use std::collections::HashMap;
use std::sync::Arc;

use obskit_core::{CycleReport, QueryId, Result, TelemetryListener, TelemetryListenerHandle};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::device::{
    detect_device, DeviceCapabilities, DeviceCommand, DeviceKind, DeviceProtocol,
};
use crate::protocol::codec::Command;
use crate::protocol::executor::{CommandExecutor, RetryPolicy};
use crate::protocol::poll::{CoordinatorState, PollCoordinator};
use crate::transport::{Transport, TransportCloseHandle};

/// Drives one instrument over one transport.
pub struct DeviceEngine {
    executor: CommandExecutor,
    family: Box<dyn DeviceProtocol>,
    coordinator: PollCoordinator,
    listeners: Arc<RwLock<HashMap<String, Arc<dyn TelemetryListener>>>>,
}

impl DeviceEngine {
    /// Create an engine for a known device family, not yet connected
    pub fn new(family: Box<dyn DeviceProtocol>, policy: RetryPolicy) -> Self {
        let executor = CommandExecutor::new(family.response_terminators(), policy);
        Self {
            executor,
            family,
            coordinator: PollCoordinator::new(),
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a transport and run the family handshake.
    ///
    /// On success the poll plan is installed and listeners are told about
    /// the connection. On failure the transport is closed and dropped.
    pub async fn connect(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.executor.attach(transport);
        // Fresh session: undo any terminator promotion from a previous one
        self.executor
            .set_terminators(self.family.response_terminators());
        if let Err(e) = self.family.handshake(&mut self.executor) {
            warn!("{} handshake failed: {}", self.family.name(), e);
            self.executor.close();
            return Err(e);
        }
        self.start_session().await;
        Ok(())
    }

    /// Attach a transport and probe candidate families in order, keeping
    /// the first whose handshake succeeds.
    pub async fn connect_detecting(
        &mut self,
        transport: Box<dyn Transport>,
        candidates: Vec<Box<dyn DeviceProtocol>>,
    ) -> Result<()> {
        self.executor.attach(transport);
        match detect_device(&mut self.executor, candidates) {
            Ok(family) => self.family = family,
            Err(e) => {
                self.executor.close();
                return Err(e);
            }
        }
        self.start_session().await;
        Ok(())
    }

    async fn start_session(&mut self) {
        self.coordinator.install_plan(self.family.poll_plan());
        info!(
            "Connected to {} on {}",
            self.family.name(),
            self.executor.transport_name().unwrap_or_default()
        );
        let name = self.family.name().to_string();
        for listener in self.snapshot() {
            listener.on_connected(&name).await;
        }
    }

    /// Close the transport, stop polling, and drop cached telemetry.
    ///
    /// Listeners are only notified when a transport was actually attached,
    /// so calling this twice notifies once.
    pub async fn disconnect(&mut self) {
        let had_transport = self.executor.close_handle().is_some();
        self.executor.close();
        self.coordinator.reset();
        if had_transport {
            info!("Disconnected from {}", self.family.name());
            for listener in self.snapshot() {
                listener.on_disconnected().await;
            }
        }
    }

    /// Run one poll cycle if polling is active and the link is up
    pub async fn poll_tick(&mut self) -> Option<CycleReport> {
        let listeners = self.snapshot();
        self.coordinator.tick(&mut self.executor, &listeners).await
    }

    /// Apply a typed device command
    pub fn apply(&mut self, command: &DeviceCommand) -> Result<()> {
        self.family.dispatch(&mut self.executor, command)
    }

    /// Send a raw protocol line, bypassing the typed command layer.
    ///
    /// The family's command terminator is appended. With
    /// `expects_response` the executor runs a full retried exchange;
    /// otherwise the line goes out fire-and-forget.
    pub fn send_command(&mut self, line: &str, expects_response: bool) -> Result<Option<String>> {
        let command = Command::new(line, self.family.command_terminator());
        if expects_response {
            self.executor.exchange(&command).map(Some)
        } else {
            self.executor.send_only(&command).map(|()| None)
        }
    }

    /// Register a telemetry listener
    pub fn register_listener(
        &mut self,
        listener: Arc<dyn TelemetryListener>,
    ) -> TelemetryListenerHandle {
        let id = Uuid::new_v4().to_string();
        let handle = TelemetryListenerHandle(id.clone());
        self.listeners.write().insert(id, listener);
        handle
    }

    /// Remove a previously registered listener
    pub fn unregister_listener(&mut self, handle: TelemetryListenerHandle) {
        let _ = self.listeners.write().remove(&handle.0);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether a usable transport is attached
    pub fn is_connected(&self) -> bool {
        self.executor.is_connected()
    }

    /// Whether the poll coordinator is active
    pub fn is_polling(&self) -> bool {
        self.coordinator.state() == CoordinatorState::Polling
    }

    /// Kind of the (current) device family
    pub fn kind(&self) -> DeviceKind {
        self.family.kind()
    }

    /// Family name of the connected device
    pub fn device_name(&self) -> &str {
        self.family.name()
    }

    /// Capabilities detected by the last handshake
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.family.capabilities()
    }

    /// Firmware version reported by the last handshake, if any
    pub fn firmware_version(&self) -> Option<&str> {
        self.family.firmware_version()
    }

    /// Transport endpoint name, if attached
    pub fn transport_name(&self) -> Option<String> {
        self.executor.transport_name()
    }

    /// Close handle for aborting a blocked read from another task
    pub fn close_handle(&self) -> Option<TransportCloseHandle> {
        self.executor.close_handle()
    }

    /// Last successfully decoded fields for a query, if any
    pub fn cached(&self, query: QueryId) -> Option<&[String]> {
        self.coordinator.diff().cached(query)
    }

    // Lock is released before any await point
    fn snapshot(&self) -> Vec<Arc<dyn TelemetryListener>> {
        self.listeners.read().values().cloned().collect()
    }
}
