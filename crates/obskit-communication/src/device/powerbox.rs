//! Pegasus-style power distribution boxes
//!
//! These devices answer an identity probe (`P#`) with a variant marker,
//! report telemetry as colon-delimited records echoing the query name, and
//! acknowledge set commands by echoing them back. Commands are LF
//! terminated; responses are CR framed on older firmware and LF framed on
//! newer, so the family declares CR with an LF fallback and relies on the
//! executor's sticky promotion.
//!
//! An external stepper motor controller may be attached; its presence is
//! probed once during the handshake and extends the capability set and the
//! poll plan.

use std::fmt;
use std::time::Duration;

use obskit_core::{
    FieldGroup, FieldSchema, ProtocolError, QueryId, ResponseRecord, Result,
};
use tracing::{debug, info};

use crate::device::{DeviceCapabilities, DeviceCommand, DeviceKind, DeviceProtocol};
use crate::protocol::codec::{Command, ResponseTerminators};
use crate::protocol::executor::{CommandExecutor, RetryPolicy};
use crate::protocol::poll::PollQuery;

/// Terminator appended to every command this family sends.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// Response framing: CR primary with LF fallback.
pub const RESPONSE_TERMINATORS: ResponseTerminators =
    ResponseTerminators::with_fallback(b'\r', b'\n');

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

const STATUS_GROUPS: &[FieldGroup] = &[
    FieldGroup {
        name: "power_ports",
        indices: &[0, 1, 2, 3],
    },
    FieldGroup {
        name: "variable_output",
        indices: &[4],
    },
    FieldGroup {
        name: "auto_dew",
        indices: &[5],
    },
    FieldGroup {
        name: "environment",
        indices: &[6, 8],
    },
    FieldGroup {
        name: "power_sensors",
        indices: &[7, 11],
    },
    FieldGroup {
        name: "dew_outputs",
        indices: &[9, 10],
    },
    FieldGroup {
        name: "indicators",
        indices: &[12],
    },
];

/// Status snapshot query: port states, dew duties, and sensor readings.
pub const STATUS_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId("PA"),
    delimiter: ':',
    labeled: true,
    min_fields: 13,
    groups: STATUS_GROUPS,
};

/// Supply query: input voltage, current, and power.
pub const SUPPLY_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId("PS"),
    delimiter: ':',
    labeled: true,
    min_fields: 3,
    groups: &[FieldGroup {
        name: "supply",
        indices: &[0, 1, 2],
    }],
};

/// Per-rail current metrics plus uptime. Advanced variants only.
pub const METRICS_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId("PC"),
    delimiter: ':',
    labeled: true,
    min_fields: 5,
    groups: &[
        FieldGroup {
            name: "currents",
            indices: &[0, 1, 2, 3],
        },
        FieldGroup {
            name: "uptime",
            indices: &[4],
        },
    ],
};

/// Motor running flag, `#`-delimited (`XS:1#0`).
pub const MOTOR_STATE_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId("XS:1"),
    delimiter: '#',
    labeled: true,
    min_fields: 1,
    groups: &[FieldGroup {
        name: "motor_state",
        indices: &[0],
    }],
};

/// Motor position in ticks, `#`-delimited (`XS:2#3500`).
pub const MOTOR_POSITION_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId("XS:2"),
    delimiter: '#',
    labeled: true,
    min_fields: 1,
    groups: &[FieldGroup {
        name: "motor_position",
        indices: &[0],
    }],
};

/// Firmware version reply (`PV:1.2`).
pub const FIRMWARE_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId("PV"),
    delimiter: ':',
    labeled: true,
    min_fields: 1,
    groups: &[],
};

/// Hardware variant reported by the identity probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerBoxVariant {
    /// PPB: no variable output, no per-rail metrics
    #[default]
    Basic,
    /// PPBA/PPBM: full feature set
    Advanced,
}

impl PowerBoxVariant {
    /// Feature set the variant ships with
    pub fn capabilities(self) -> DeviceCapabilities {
        let base = DeviceCapabilities::POWER_PORTS
            .union(DeviceCapabilities::DEW_OUTPUTS)
            .union(DeviceCapabilities::AUTO_DEW)
            .union(DeviceCapabilities::ENVIRONMENT_SENSORS)
            .union(DeviceCapabilities::LED_TOGGLE)
            .union(DeviceCapabilities::POWER_CYCLE);
        match self {
            Self::Basic => base,
            Self::Advanced => base
                .union(DeviceCapabilities::VARIABLE_OUTPUT)
                .union(DeviceCapabilities::CURRENT_METRICS),
        }
    }
}

impl fmt::Display for PowerBoxVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "PPB"),
            Self::Advanced => write!(f, "PPBA"),
        }
    }
}

/// Dew heater output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DewChannel {
    A,
    B,
}

impl DewChannel {
    fn port_number(self) -> u8 {
        match self {
            Self::A => 6,
            Self::B => 7,
        }
    }
}

/// Control commands a power box accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerBoxCommand {
    /// Switch one of the four 12V ports (1-4)
    SetPort { port: u8, on: bool },
    /// Switch the variable-voltage output
    SetVariableOutput { on: bool },
    /// Set a dew heater duty cycle (0-255)
    SetDewDuty { channel: DewChannel, duty: u8 },
    /// Toggle automatic dew control
    SetAutoDew { on: bool },
    /// Toggle the status LED
    SetLed { on: bool },
    /// Select which ports power up after boot
    SetPowerOnBoot { ports: [bool; 4] },
    /// Reboot the device; no reply is sent
    Reboot,
}

impl PowerBoxCommand {
    /// Render the wire command.
    ///
    /// The dew duty is sent zero-padded but the device echoes it back
    /// unpadded, so that command carries an explicit acknowledgement.
    /// Power-on-boot is acknowledged with a fixed `PE:1`.
    pub fn render(&self) -> Command {
        match self {
            Self::SetPort { port, on } => Command::new(
                format!("P{}:{}", port, u8::from(*on)),
                COMMAND_TERMINATOR,
            ),
            Self::SetVariableOutput { on } => {
                Command::new(format!("P5:{}", u8::from(*on)), COMMAND_TERMINATOR)
            }
            Self::SetDewDuty { channel, duty } => Command::new(
                format!("P{}:{:03}", channel.port_number(), duty),
                COMMAND_TERMINATOR,
            )
            .with_ack(format!("P{}:{}", channel.port_number(), duty)),
            Self::SetAutoDew { on } => {
                Command::new(format!("PD:{}", u8::from(*on)), COMMAND_TERMINATOR)
            }
            Self::SetLed { on } => {
                Command::new(format!("PL:{}", u8::from(*on)), COMMAND_TERMINATOR)
            }
            Self::SetPowerOnBoot { ports } => Command::new(
                format!(
                    "PE:{}{}{}{}",
                    u8::from(ports[0]),
                    u8::from(ports[1]),
                    u8::from(ports[2]),
                    u8::from(ports[3])
                ),
                COMMAND_TERMINATOR,
            )
            .with_ack("PE:1"),
            Self::Reboot => Command::new("PF", COMMAND_TERMINATOR),
        }
    }

    /// Capability the command requires
    pub fn required_capability(&self) -> DeviceCapabilities {
        match self {
            Self::SetPort { .. } | Self::SetPowerOnBoot { .. } => DeviceCapabilities::POWER_PORTS,
            Self::SetVariableOutput { .. } => DeviceCapabilities::VARIABLE_OUTPUT,
            Self::SetDewDuty { .. } => DeviceCapabilities::DEW_OUTPUTS,
            Self::SetAutoDew { .. } => DeviceCapabilities::AUTO_DEW,
            Self::SetLed { .. } => DeviceCapabilities::LED_TOGGLE,
            Self::Reboot => DeviceCapabilities::POWER_CYCLE,
        }
    }
}

/// Commands for the external motor controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotorCommand {
    /// Move to an absolute position in ticks; the controller replies
    MoveAbs { ticks: u32 },
    /// Stop the motor immediately
    Halt,
    /// Reverse the motion direction
    Reverse { on: bool },
    /// Redefine the current position without moving
    Sync { ticks: u32 },
    /// Set the maximum motor speed
    SetMaxSpeed { speed: u16 },
    /// Set backlash compensation steps
    SetBacklash { steps: u16 },
}

impl MotorCommand {
    /// Render the wire command
    pub fn render(&self) -> Command {
        let payload = match self {
            Self::MoveAbs { ticks } => format!("XS:3#{}", ticks),
            Self::Halt => String::from("XS:6"),
            Self::Reverse { on } => format!("XS:8#{}", u8::from(*on)),
            Self::Sync { ticks } => format!("XS:5#{}", ticks),
            Self::SetMaxSpeed { speed } => format!("XS:7#{}", speed),
            Self::SetBacklash { steps } => format!("XS:10#{}", steps),
        };
        Command::new(payload, COMMAND_TERMINATOR)
    }
}

/// Pegasus power box family driver
#[derive(Debug, Default)]
pub struct PowerBox {
    variant: PowerBoxVariant,
    capabilities: DeviceCapabilities,
    firmware: Option<String>,
}

impl PowerBox {
    /// Create a family driver; the handshake fills in the details
    pub fn new() -> Self {
        Self::default()
    }

    /// The variant the identity probe reported
    pub fn variant(&self) -> PowerBoxVariant {
        self.variant
    }

    /// Apply a control command, validating the required capability first.
    pub fn apply(&self, executor: &mut CommandExecutor, command: &PowerBoxCommand) -> Result<()> {
        if let PowerBoxCommand::SetPort { port, .. } = command {
            if !(1..=4).contains(port) {
                return Err(ProtocolError::Other {
                    message: format!("power port {} out of range 1-4", port),
                }
                .into());
            }
        }
        self.require(command.required_capability())?;
        match command {
            PowerBoxCommand::Reboot => executor.send_only(&command.render()),
            _ => executor.set(&command.render()),
        }
    }

    /// Apply a motor command; requires the external motor controller.
    ///
    /// Moves are answered by the controller but the reply carries no
    /// useful content; the other motor commands send nothing back.
    pub fn apply_motor(&self, executor: &mut CommandExecutor, command: &MotorCommand) -> Result<()> {
        self.require(DeviceCapabilities::EXTERNAL_MOTOR)?;
        match command {
            MotorCommand::MoveAbs { .. } => {
                executor.exchange(&command.render())?;
                Ok(())
            }
            _ => executor.send_only(&command.render()),
        }
    }

    fn require(&self, capability: DeviceCapabilities) -> Result<()> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(ProtocolError::CapabilityNotAvailable {
                capability: capability.names().join("+"),
            }
            .into())
        }
    }
}

impl DeviceProtocol for PowerBox {
    fn kind(&self) -> DeviceKind {
        DeviceKind::PowerBox
    }

    fn name(&self) -> &str {
        match self.variant {
            PowerBoxVariant::Basic => "Pegasus PPB",
            PowerBoxVariant::Advanced => "Pegasus PPBA",
        }
    }

    fn command_terminator(&self) -> u8 {
        COMMAND_TERMINATOR
    }

    fn response_terminators(&self) -> ResponseTerminators {
        RESPONSE_TERMINATORS
    }

    fn handshake(&mut self, executor: &mut CommandExecutor) -> Result<()> {
        let policy = RetryPolicy::with_timeout(HANDSHAKE_TIMEOUT);
        let identity =
            executor.exchange_with(&Command::new("P#", COMMAND_TERMINATOR), policy)?;
        self.variant = match identity.as_str() {
            "PPB_OK" => PowerBoxVariant::Basic,
            "PPBA_OK" | "PPBM_OK" => PowerBoxVariant::Advanced,
            other => {
                return Err(ProtocolError::UnknownDevice {
                    identity: other.to_string(),
                }
                .into())
            }
        };
        self.capabilities = self.variant.capabilities();

        match executor.query(&Command::new("PV", COMMAND_TERMINATOR), &FIRMWARE_SCHEMA) {
            Ok(record) => {
                self.firmware = record.field(0).map(str::to_string);
                if let Some(version) = &self.firmware {
                    info!("{} firmware {}", self.name(), version);
                }
            }
            Err(e) => debug!("firmware version query failed: {}", e),
        }

        // External motor controller answers the probe with a 200 code
        match executor.exchange(&Command::new("XS", COMMAND_TERMINATOR)) {
            Ok(reply) if reply.contains("200") => {
                info!("External motor controller present");
                self.capabilities.insert(DeviceCapabilities::EXTERNAL_MOTOR);
            }
            Ok(_) => {}
            Err(e) if e.is_closed() => return Err(e),
            Err(e) => debug!("no external motor controller: {}", e),
        }

        info!(
            "{} ready, capabilities: {}",
            self.name(),
            self.capabilities.names().join(", ")
        );
        Ok(())
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn firmware_version(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    fn poll_plan(&self) -> Vec<PollQuery> {
        let mut plan = vec![
            PollQuery {
                query: STATUS_SCHEMA.query,
                command: Command::new("PA", COMMAND_TERMINATOR),
                schema: STATUS_SCHEMA,
            },
            PollQuery {
                query: SUPPLY_SCHEMA.query,
                command: Command::new("PS", COMMAND_TERMINATOR),
                schema: SUPPLY_SCHEMA,
            },
        ];
        if self.capabilities.contains(DeviceCapabilities::CURRENT_METRICS) {
            plan.push(PollQuery {
                query: METRICS_SCHEMA.query,
                command: Command::new("PC", COMMAND_TERMINATOR),
                schema: METRICS_SCHEMA,
            });
        }
        if self.capabilities.contains(DeviceCapabilities::EXTERNAL_MOTOR) {
            plan.push(PollQuery {
                query: MOTOR_STATE_SCHEMA.query,
                command: Command::new("XS:1", COMMAND_TERMINATOR),
                schema: MOTOR_STATE_SCHEMA,
            });
            plan.push(PollQuery {
                query: MOTOR_POSITION_SCHEMA.query,
                command: Command::new("XS:2", COMMAND_TERMINATOR),
                schema: MOTOR_POSITION_SCHEMA,
            });
        }
        plan
    }

    fn dispatch(&self, executor: &mut CommandExecutor, command: &DeviceCommand) -> Result<()> {
        match command {
            DeviceCommand::Power(cmd) => self.apply(executor, cmd),
            DeviceCommand::Motor(cmd) => self.apply_motor(executor, cmd),
            DeviceCommand::Focuser(_) => Err(ProtocolError::Other {
                message: String::from("focuser commands are not accepted by a power box"),
            }
            .into()),
        }
    }
}

/// Typed view of a status record.
///
/// Field layout: four port states, variable output state, auto-dew state,
/// temperature, total current, humidity, two dew duties, power warning,
/// LED state.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerStatus {
    pub ports: [bool; 4],
    pub variable_output: bool,
    pub auto_dew: bool,
    pub temperature: f64,
    pub current: f64,
    pub humidity: f64,
    pub dew_duty_a: u8,
    pub dew_duty_b: u8,
    pub power_warning: bool,
    pub led: bool,
}

impl PowerStatus {
    /// Parse a decoded status record. Returns `None` when a field does not
    /// parse as its expected type.
    pub fn from_record(record: &ResponseRecord) -> Option<Self> {
        Some(Self {
            ports: [
                flag(record, 0)?,
                flag(record, 1)?,
                flag(record, 2)?,
                flag(record, 3)?,
            ],
            variable_output: flag(record, 4)?,
            auto_dew: flag(record, 5)?,
            temperature: number(record, 6)?,
            current: number(record, 7)?,
            humidity: number(record, 8)?,
            dew_duty_a: record.field(9)?.parse().ok()?,
            dew_duty_b: record.field(10)?.parse().ok()?,
            power_warning: flag(record, 11)?,
            led: flag(record, 12)?,
        })
    }
}

/// Typed view of a metrics record. Uptime arrives in milliseconds and is
/// reported in fractional hours.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerMetrics {
    pub total_current: f64,
    pub quad_current: f64,
    pub dew_a_current: f64,
    pub dew_b_current: f64,
    pub uptime_hours: f64,
}

impl PowerMetrics {
    /// Parse a decoded metrics record
    pub fn from_record(record: &ResponseRecord) -> Option<Self> {
        let uptime_ms: u64 = record.field(4)?.parse().ok()?;
        Some(Self {
            total_current: number(record, 0)?,
            quad_current: number(record, 1)?,
            dew_a_current: number(record, 2)?,
            dew_b_current: number(record, 3)?,
            uptime_hours: uptime_ms as f64 / 3_600_000.0,
        })
    }
}

/// Numeric value of a motor record (`XS:2#3500` yields 3500)
pub fn motor_value(record: &ResponseRecord) -> Option<u32> {
    record.field(0)?.parse().ok()
}

fn flag(record: &ResponseRecord, index: usize) -> Option<bool> {
    match record.field(index)? {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

fn number(record: &ResponseRecord, index: usize) -> Option<f64> {
    record.field(index)?.parse().ok()
}

#[cfg(test)]
impl PowerBox {
    /// Build a family driver in a post-handshake state (test helper)
    pub(crate) fn with_detected(variant: PowerBoxVariant, capabilities: DeviceCapabilities) -> Self {
        Self {
            variant,
            capabilities,
            firmware: None,
        }
    }
}
