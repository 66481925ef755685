//! Error handling for ObsKit
//!
//! Provides error types for all layers of the engine:
//! - Transport errors (serial/TCP links)
//! - Protocol errors (command exchange, response decoding, device setup)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport error type
///
/// Represents errors raised by the byte transports (serial ports, TCP
/// sockets), including open failures, framing timeouts, and link loss.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Port exists but could not be opened
    #[error("Failed to open port {port}: {reason}")]
    PortUnavailable {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Write to the device failed
    #[error("Write failed: {reason}")]
    WriteError {
        /// The reason the write failed.
        reason: String,
    },

    /// Read from the device failed
    #[error("Read failed: {reason}")]
    ReadError {
        /// The reason the read failed.
        reason: String,
    },

    /// No terminator arrived within the read deadline
    #[error("Read timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Response exceeded the maximum frame size
    #[error("Response exceeded {limit} bytes without a terminator")]
    Overflow {
        /// The maximum number of response bytes accepted.
        limit: usize,
    },

    /// The transport was closed while an operation was in flight
    #[error("Transport closed")]
    Closed,

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// Generic transport error
    #[error("Transport error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Protocol error type
///
/// Represents errors in the command/response protocol layered on top of a
/// transport: exhausted retries, failed acknowledgements, malformed
/// telemetry records, and device identification failures.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Every attempt at a command exchange failed
    #[error("No response to '{command}' after {attempts} attempts")]
    NoResponse {
        /// The command that received no response.
        command: String,
        /// The number of attempts made.
        attempts: u32,
    },

    /// A set command was not echoed back as expected
    #[error("Acknowledgement mismatch: expected '{expected}', got '{actual}'")]
    AckMismatch {
        /// The acknowledgement the device was expected to send.
        expected: String,
        /// The acknowledgement actually received.
        actual: String,
    },

    /// A telemetry response had fewer fields than its schema requires
    #[error("Response to '{query}' had {actual} fields, expected at least {expected}")]
    SchemaMismatch {
        /// The query whose response was malformed.
        query: String,
        /// The minimum number of fields the schema requires.
        expected: usize,
        /// The number of fields actually received.
        actual: usize,
    },

    /// Device setup handshake failed
    #[error("Handshake with {device} failed: {reason}")]
    HandshakeFailed {
        /// The device family being set up.
        device: String,
        /// The reason the handshake failed.
        reason: String,
    },

    /// The device answered the identity query with an unknown string
    #[error("Unrecognized device identity: '{identity}'")]
    UnknownDevice {
        /// The identity string the device reported.
        identity: String,
    },

    /// Operation requires a capability the connected device lacks
    #[error("Capability not available: {capability}")]
    CapabilityNotAvailable {
        /// The capability that is not available.
        capability: String,
    },

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// Generic protocol error
    #[error("Protocol error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Main error type for ObsKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a read timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Timeout { .. }))
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if the transport was closed underneath the operation
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Closed))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

// Conversions between error types are automatic via `from` implementations
