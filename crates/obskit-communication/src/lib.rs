//! # ObsKit Communication
//!
//! Transports, protocol engine, and device family implementations for
//! ObsKit. Supports Serial/USB and TCP/IP connections and drives
//! Pegasus-style power boxes and MoonLite-style focusers over a shared
//! line-oriented command engine.

pub mod device;
pub mod engine;
pub mod protocol;
pub mod service;
pub mod transport;

pub use transport::{
    list_ports, open_transport, ConnectionDriver, ConnectionParams, SerialParity, SerialPortInfo,
    SerialTransport, TcpTransport, Transport, TransportCloseHandle, MAX_RESPONSE_BYTES,
};

pub use protocol::{
    decode_boundary, encode, Command, CommandExecutor, CoordinatorState, PollCoordinator,
    PollQuery, ResponseTerminators, RetryPolicy,
};

pub use device::{
    detect_device, DeviceCapabilities, DeviceCommand, DeviceKind, DeviceProtocol, DewChannel,
    Focuser, FocuserCommand, MotorCommand, PowerBox, PowerBoxCommand, PowerBoxVariant,
    PowerMetrics, PowerStatus,
};

pub use engine::DeviceEngine;
pub use service::{PollService, PollServiceHandle};
