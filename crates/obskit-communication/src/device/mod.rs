//! Device family implementations
//!
//! Supported instrument families:
//! - PowerBox: Pegasus-style power distribution boxes, colon-delimited
//!   telemetry with acknowledgement echoes
//! - Focuser: MoonLite-style stepper focusers, `#`-framed hex exchanges
//!
//! A [`DeviceProtocol`] packages everything the engine needs to drive one
//! family: response framing, the setup handshake, the detected capability
//! set, and the telemetry poll plan.

pub mod focuser;
pub mod powerbox;

use std::fmt;

use obskit_core::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::protocol::codec::ResponseTerminators;
use crate::protocol::executor::CommandExecutor;
use crate::protocol::poll::PollQuery;

pub use focuser::{Focuser, FocuserCommand};
pub use powerbox::{
    DewChannel, MotorCommand, PowerBox, PowerBoxCommand, PowerBoxVariant, PowerMetrics,
    PowerStatus,
};

/// Kind of instrument a family drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Power distribution box
    PowerBox,
    /// Stepper focuser
    Focuser,
    /// Unknown/generic
    #[default]
    Unknown,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerBox => write!(f, "power box"),
            Self::Focuser => write!(f, "focuser"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Set of features a connected device actually has.
///
/// Filled in during the handshake; operations check the relevant flag
/// before sending and the poll plan only includes queries the device can
/// answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities(u32);

impl DeviceCapabilities {
    /// Switchable 12V power ports
    pub const POWER_PORTS: DeviceCapabilities = DeviceCapabilities(1 << 0);
    /// PWM dew heater outputs
    pub const DEW_OUTPUTS: DeviceCapabilities = DeviceCapabilities(1 << 1);
    /// Switchable variable-voltage output
    pub const VARIABLE_OUTPUT: DeviceCapabilities = DeviceCapabilities(1 << 2);
    /// Automatic dew control
    pub const AUTO_DEW: DeviceCapabilities = DeviceCapabilities(1 << 3);
    /// Ambient temperature/humidity sensors
    pub const ENVIRONMENT_SENSORS: DeviceCapabilities = DeviceCapabilities(1 << 4);
    /// Per-rail current metrics
    pub const CURRENT_METRICS: DeviceCapabilities = DeviceCapabilities(1 << 5);
    /// External stepper motor controller
    pub const EXTERNAL_MOTOR: DeviceCapabilities = DeviceCapabilities(1 << 6);
    /// Status LED toggle
    pub const LED_TOGGLE: DeviceCapabilities = DeviceCapabilities(1 << 7);
    /// Device reboot command
    pub const POWER_CYCLE: DeviceCapabilities = DeviceCapabilities(1 << 8);
    /// Absolute position reporting
    pub const ABSOLUTE_POSITION: DeviceCapabilities = DeviceCapabilities(1 << 9);
    /// Temperature probe
    pub const TEMPERATURE_PROBE: DeviceCapabilities = DeviceCapabilities(1 << 10);

    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Union of two sets, usable in const context
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every flag in `other` is present
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add the flags in `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// True when no flag is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the set flags, for logs
    pub fn names(self) -> Vec<&'static str> {
        const TABLE: &[(DeviceCapabilities, &str)] = &[
            (DeviceCapabilities::POWER_PORTS, "power_ports"),
            (DeviceCapabilities::DEW_OUTPUTS, "dew_outputs"),
            (DeviceCapabilities::VARIABLE_OUTPUT, "variable_output"),
            (DeviceCapabilities::AUTO_DEW, "auto_dew"),
            (DeviceCapabilities::ENVIRONMENT_SENSORS, "environment_sensors"),
            (DeviceCapabilities::CURRENT_METRICS, "current_metrics"),
            (DeviceCapabilities::EXTERNAL_MOTOR, "external_motor"),
            (DeviceCapabilities::LED_TOGGLE, "led_toggle"),
            (DeviceCapabilities::POWER_CYCLE, "power_cycle"),
            (DeviceCapabilities::ABSOLUTE_POSITION, "absolute_position"),
            (DeviceCapabilities::TEMPERATURE_PROBE, "temperature_probe"),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::ops::BitOr for DeviceCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// A typed control command for any supported family.
///
/// Families reject commands that belong to another family, so a caller
/// holding a type-erased protocol can still route commands safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Power box output/setting command
    Power(PowerBoxCommand),
    /// Power box external motor command
    Motor(MotorCommand),
    /// Focuser command
    Focuser(FocuserCommand),
}

/// A device family protocol implementation.
///
/// One instance drives one connection; the handshake fills in variant,
/// capabilities, and firmware details that the other methods report.
pub trait DeviceProtocol: Send {
    /// Instrument kind
    fn kind(&self) -> DeviceKind;

    /// Human-readable family name
    fn name(&self) -> &str;

    /// Terminator appended to outgoing commands
    fn command_terminator(&self) -> u8;

    /// Response framing this family expects
    fn response_terminators(&self) -> ResponseTerminators;

    /// Identify and configure the device after the link opens.
    ///
    /// Runs the identity exchange, detects the variant and optional
    /// features, and records the firmware version where the family
    /// reports one.
    fn handshake(&mut self, executor: &mut CommandExecutor) -> Result<()>;

    /// Capabilities detected during the handshake
    fn capabilities(&self) -> DeviceCapabilities;

    /// Firmware version reported during the handshake, if any
    fn firmware_version(&self) -> Option<&str>;

    /// Telemetry queries to run each poll cycle, in order.
    ///
    /// Already filtered to the detected capabilities; the plan does not
    /// change until the next handshake.
    fn poll_plan(&self) -> Vec<PollQuery>;

    /// Route a typed command to the device, validating capabilities.
    ///
    /// Commands for a different family fail with a protocol error.
    fn dispatch(&self, executor: &mut CommandExecutor, command: &DeviceCommand) -> Result<()>;
}

/// Try each candidate family's handshake in turn.
///
/// Returns the first family whose handshake succeeds. The executor's
/// framing is switched to each candidate's terminators before its attempt.
/// A closed transport aborts detection; any other failure moves on to the
/// next candidate.
pub fn detect_device(
    executor: &mut CommandExecutor,
    candidates: Vec<Box<dyn DeviceProtocol>>,
) -> Result<Box<dyn DeviceProtocol>> {
    for mut family in candidates {
        executor.set_terminators(family.response_terminators());
        match family.handshake(executor) {
            Ok(()) => {
                info!("Detected {} ({})", family.name(), family.kind());
                return Ok(family);
            }
            Err(e) if e.is_closed() => return Err(e),
            Err(e) => {
                debug!("{} handshake failed: {}", family.name(), e);
            }
        }
    }

    Err(ProtocolError::Other {
        message: String::from("no supported device family responded"),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_operations() {
        let mut caps = DeviceCapabilities::POWER_PORTS | DeviceCapabilities::DEW_OUTPUTS;
        assert!(caps.contains(DeviceCapabilities::POWER_PORTS));
        assert!(!caps.contains(DeviceCapabilities::EXTERNAL_MOTOR));
        caps.insert(DeviceCapabilities::EXTERNAL_MOTOR);
        assert!(caps.contains(DeviceCapabilities::EXTERNAL_MOTOR));
        assert!(!caps.contains(
            DeviceCapabilities::POWER_PORTS | DeviceCapabilities::CURRENT_METRICS
        ));
    }

    #[test]
    fn test_capability_names() {
        let caps = DeviceCapabilities::AUTO_DEW | DeviceCapabilities::LED_TOGGLE;
        let names = caps.names();
        assert_eq!(names, vec!["auto_dew", "led_toggle"]);
        assert!(DeviceCapabilities::empty().names().is_empty());
    }

    #[test]
    fn test_device_kind_display() {
        assert_eq!(DeviceKind::PowerBox.to_string(), "power box");
        assert_eq!(DeviceKind::Focuser.to_string(), "focuser");
    }
}
