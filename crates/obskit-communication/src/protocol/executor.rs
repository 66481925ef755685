//! Command exchange execution
//!
//! One [`CommandExecutor`] owns the transport for a connection and runs
//! every exchange on it: flush stale input, write the framed command, read
//! one terminated response line, strip the boundary. Failed attempts are
//! retried up to the policy budget, alternating to the fallback response
//! terminator after a framing failure. A response successfully framed by
//! the fallback promotes it for the rest of the session.
//!
//! The executor is intentionally synchronous. These devices accept one
//! outstanding command, so the engine serializes exchanges anyway.

use std::time::Duration;

use obskit_core::{Error, FieldSchema, ProtocolError, ResponseRecord, Result, TransportError};
use tracing::{debug, warn};

use crate::protocol::codec::{self, Command, ResponseTerminators};
use crate::transport::{Transport, TransportCloseHandle};

/// Retry policy for command exchanges.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of write/read attempts per exchange.
    pub max_attempts: u32,
    /// Read deadline for each attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            attempt_timeout: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Policy with a different attempt deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            attempt_timeout: timeout,
            ..Self::default()
        }
    }
}

/// Runs command exchanges over a transport with retry and acknowledgement
/// handling.
pub struct CommandExecutor {
    transport: Option<Box<dyn Transport>>,
    terminators: ResponseTerminators,
    policy: RetryPolicy,
}

impl CommandExecutor {
    /// Create an executor with no transport attached
    pub fn new(terminators: ResponseTerminators, policy: RetryPolicy) -> Self {
        Self {
            transport: None,
            terminators,
            policy,
        }
    }

    /// Attach the transport all subsequent exchanges use
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Detach and return the transport, if any
    pub fn detach(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    /// Whether a usable transport is attached
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().map(|t| t.is_open()).unwrap_or(false)
    }

    /// The transport endpoint name, if attached
    pub fn transport_name(&self) -> Option<String> {
        self.transport.as_ref().map(|t| t.name())
    }

    /// Current response framing
    pub fn terminators(&self) -> ResponseTerminators {
        self.terminators
    }

    /// Replace the response framing, e.g. when switching device families
    pub fn set_terminators(&mut self, terminators: ResponseTerminators) {
        self.terminators = terminators;
    }

    /// The default retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Close handle of the attached transport, usable from another task to
    /// abort a blocked read
    pub fn close_handle(&self) -> Option<TransportCloseHandle> {
        self.transport.as_ref().map(|t| t.close_handle())
    }

    /// Close the attached transport and drop it
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Run one exchange with the default policy.
    pub fn exchange(&mut self, command: &Command) -> Result<String> {
        let policy = self.policy;
        self.exchange_with(command, policy)
    }

    /// Run one exchange: discard stale input, write the command, read one
    /// boundary-stripped response line.
    ///
    /// A read that times out or overflows switches the next attempt to the
    /// fallback terminator. An empty line after boundary stripping counts
    /// as a failed attempt. Every attempt, fallback reads included, draws
    /// from the same `max_attempts` budget; exhausting it yields
    /// `NoResponse`. A closed transport aborts immediately.
    pub fn exchange_with(&mut self, command: &Command, policy: RetryPolicy) -> Result<String> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::NotConnected)?;
        let encoded = codec::encode(command);

        debug!("CMD <{}>", command.payload);

        let mut use_fallback = false;
        let mut attempts = 0u32;
        while attempts < policy.max_attempts {
            attempts += 1;

            transport.discard_pending();
            if let Err(e) = transport.write(&encoded) {
                if e.is_closed() {
                    return Err(e);
                }
                warn!(
                    "write for '{}' failed (attempt {}/{}): {}",
                    command.payload, attempts, policy.max_attempts, e
                );
                continue;
            }

            let terminator = if use_fallback {
                // Checked when use_fallback was set
                self.terminators.fallback.unwrap_or(self.terminators.primary)
            } else {
                self.terminators.primary
            };

            match transport.read_until(&[terminator], policy.attempt_timeout) {
                Ok((raw, matched)) => {
                    transport.discard_pending();
                    let line = codec::decode_boundary(&raw, matched);
                    if line.is_empty() {
                        debug!(
                            "empty response to '{}' (attempt {}/{})",
                            command.payload, attempts, policy.max_attempts
                        );
                        continue;
                    }
                    if use_fallback {
                        self.terminators.promote_fallback();
                        warn!(
                            "device frames responses with {:#04x}, switching",
                            matched
                        );
                    }
                    debug!("RES <{}>", line);
                    return Ok(line);
                }
                Err(e) if e.is_closed() => return Err(e),
                Err(e)
                    if e.is_timeout()
                        || matches!(e, Error::Transport(TransportError::Overflow { .. })) =>
                {
                    debug!(
                        "no frame for '{}' (attempt {}/{}): {}",
                        command.payload, attempts, policy.max_attempts, e
                    );
                    if self.terminators.fallback.is_some() {
                        use_fallback = true;
                    }
                }
                Err(e) => {
                    warn!(
                        "read for '{}' failed (attempt {}/{}): {}",
                        command.payload, attempts, policy.max_attempts, e
                    );
                }
            }
        }

        Err(ProtocolError::NoResponse {
            command: command.payload.clone(),
            attempts,
        }
        .into())
    }

    /// Run a telemetry query and decode the response against its schema.
    pub fn query(&mut self, command: &Command, schema: &FieldSchema) -> Result<ResponseRecord> {
        let line = self.exchange(command)?;
        ResponseRecord::decode(&line, schema)
    }

    /// Run a set command and validate the acknowledgement echo.
    ///
    /// A reply that differs from the expected acknowledgement fails with
    /// `AckMismatch`; attempts exhausted without any reply surface as an
    /// `AckMismatch` with an empty actual value, so every set failure
    /// reads as an acknowledgement problem.
    pub fn set(&mut self, command: &Command) -> Result<()> {
        let expected = command.expected_ack().to_string();
        match self.exchange(command) {
            Ok(actual) if actual == expected => Ok(()),
            Ok(actual) => Err(ProtocolError::AckMismatch { expected, actual }.into()),
            Err(Error::Protocol(ProtocolError::NoResponse { .. })) => {
                Err(ProtocolError::AckMismatch {
                    expected,
                    actual: String::new(),
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    /// Write a command that produces no reply.
    pub fn send_only(&mut self, command: &Command) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::NotConnected)?;
        debug!("CMD <{}> (no reply expected)", command.payload);
        transport.discard_pending();
        transport.write(&codec::encode(command))?;
        Ok(())
    }
}
