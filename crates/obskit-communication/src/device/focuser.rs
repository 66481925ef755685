//! MoonLite-style stepper focusers
//!
//! The protocol frames both directions with `#`: commands look like
//! `:GP#` and replies like `0200#`. Values travel as fixed-width
//! uppercase hex. Set commands are never acknowledged, and the device
//! reports no firmware version, so the handshake probes the position
//! register and accepts any reply that parses as hex.

use std::time::Duration;

use obskit_core::{FieldGroup, FieldSchema, ProtocolError, QueryId, ResponseRecord, Result};
use tracing::info;

use crate::device::{DeviceCapabilities, DeviceCommand, DeviceKind, DeviceProtocol};
use crate::protocol::codec::{Command, ResponseTerminators};
use crate::protocol::executor::{CommandExecutor, RetryPolicy};
use crate::protocol::poll::PollQuery;

/// Terminator appended to every command this family sends.
pub const COMMAND_TERMINATOR: u8 = b'#';

/// Responses are framed by `#` with no fallback.
pub const RESPONSE_TERMINATORS: ResponseTerminators = ResponseTerminators::new(b'#');

const HANDSHAKE_ATTEMPTS: u32 = 3;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Absolute position register, hex (`0200` is 512 ticks).
pub const POSITION_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId(":GP"),
    delimiter: '#',
    labeled: false,
    min_fields: 1,
    groups: &[FieldGroup {
        name: "position",
        indices: &[0],
    }],
};

/// Motion flag, `01` while the motor is moving.
pub const MOVING_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId(":GI"),
    delimiter: '#',
    labeled: false,
    min_fields: 1,
    groups: &[FieldGroup {
        name: "moving",
        indices: &[0],
    }],
};

/// Probe temperature, signed 16-bit hex in half-degree steps.
pub const TEMPERATURE_SCHEMA: FieldSchema = FieldSchema {
    query: QueryId(":GT"),
    delimiter: '#',
    labeled: false,
    min_fields: 1,
    groups: &[FieldGroup {
        name: "temperature",
        indices: &[0],
    }],
};

/// Control commands a focuser accepts. None of them are acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocuserCommand {
    /// Load a target position and start moving toward it
    MoveAbs { ticks: u16 },
    /// Stop the current move immediately
    Halt,
    /// Redefine the current position without moving
    SyncPosition { ticks: u16 },
    /// Set the stepping delay; valid values are 02, 04, 08, 10, 20 hex
    SetSpeed { speed: u8 },
    /// Switch between half and full stepping
    SetHalfStep { on: bool },
    /// Start a temperature conversion ahead of a temperature query
    StartTempConversion,
}

impl FocuserCommand {
    /// Render the wire commands. A move loads the target register and then
    /// triggers the motion, so it expands to two writes.
    pub fn render(&self) -> Vec<Command> {
        match self {
            Self::MoveAbs { ticks } => vec![
                Command::new(format!(":SN{:04X}", ticks), COMMAND_TERMINATOR),
                Command::new(":FG", COMMAND_TERMINATOR),
            ],
            Self::Halt => vec![Command::new(":FQ", COMMAND_TERMINATOR)],
            Self::SyncPosition { ticks } => {
                vec![Command::new(format!(":SP{:04X}", ticks), COMMAND_TERMINATOR)]
            }
            Self::SetSpeed { speed } => {
                vec![Command::new(format!(":SD{:02X}", speed), COMMAND_TERMINATOR)]
            }
            Self::SetHalfStep { on } => {
                let payload = if *on { ":SH" } else { ":SF" };
                vec![Command::new(payload, COMMAND_TERMINATOR)]
            }
            Self::StartTempConversion => vec![Command::new(":C", COMMAND_TERMINATOR)],
        }
    }
}

/// MoonLite focuser family driver
#[derive(Debug, Default)]
pub struct Focuser;

impl Focuser {
    pub fn new() -> Self {
        Self
    }

    /// Apply a control command. Focuser sets send no reply, so every
    /// rendered write goes out fire-and-forget.
    pub fn apply(&self, executor: &mut CommandExecutor, command: &FocuserCommand) -> Result<()> {
        for wire in command.render() {
            executor.send_only(&wire)?;
        }
        Ok(())
    }
}

impl DeviceProtocol for Focuser {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Focuser
    }

    fn name(&self) -> &str {
        "MoonLite focuser"
    }

    fn command_terminator(&self) -> u8 {
        COMMAND_TERMINATOR
    }

    fn response_terminators(&self) -> ResponseTerminators {
        RESPONSE_TERMINATORS
    }

    fn handshake(&mut self, executor: &mut CommandExecutor) -> Result<()> {
        let policy = RetryPolicy {
            max_attempts: HANDSHAKE_ATTEMPTS,
            attempt_timeout: HANDSHAKE_TIMEOUT,
        };
        let reply = executor.exchange_with(&Command::new(":GP", COMMAND_TERMINATOR), policy)?;
        match u32::from_str_radix(&reply, 16) {
            Ok(position) => {
                info!("{} ready at position {}", self.name(), position);
                Ok(())
            }
            Err(_) => Err(ProtocolError::HandshakeFailed {
                device: self.name().to_string(),
                reason: format!("position probe returned {:?}", reply),
            }
            .into()),
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::ABSOLUTE_POSITION.union(DeviceCapabilities::TEMPERATURE_PROBE)
    }

    fn firmware_version(&self) -> Option<&str> {
        None
    }

    fn poll_plan(&self) -> Vec<PollQuery> {
        vec![
            PollQuery {
                query: POSITION_SCHEMA.query,
                command: Command::new(":GP", COMMAND_TERMINATOR),
                schema: POSITION_SCHEMA,
            },
            PollQuery {
                query: MOVING_SCHEMA.query,
                command: Command::new(":GI", COMMAND_TERMINATOR),
                schema: MOVING_SCHEMA,
            },
            PollQuery {
                query: TEMPERATURE_SCHEMA.query,
                command: Command::new(":GT", COMMAND_TERMINATOR),
                schema: TEMPERATURE_SCHEMA,
            },
        ]
    }

    fn dispatch(&self, executor: &mut CommandExecutor, command: &DeviceCommand) -> Result<()> {
        match command {
            DeviceCommand::Focuser(cmd) => self.apply(executor, cmd),
            DeviceCommand::Power(_) | DeviceCommand::Motor(_) => Err(ProtocolError::Other {
                message: String::from("power box commands are not accepted by a focuser"),
            }
            .into()),
        }
    }
}

/// Position in ticks from a position record
pub fn parse_position(record: &ResponseRecord) -> Option<u32> {
    u32::from_str_radix(record.field(0)?, 16).ok()
}

/// Motion flag from a moving record
pub fn parse_moving(record: &ResponseRecord) -> Option<bool> {
    match record.field(0)? {
        "00" => Some(false),
        "01" => Some(true),
        _ => None,
    }
}

/// Temperature in degrees C from a temperature record. The register is a
/// signed 16-bit half-degree count, so `FFF6` reads as -5.0.
pub fn parse_temperature(record: &ResponseRecord) -> Option<f64> {
    let raw = u32::from_str_radix(record.field(0)?, 16).ok()?;
    Some(f64::from(raw as u16 as i16) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str, schema: &FieldSchema) -> ResponseRecord {
        ResponseRecord::decode(line, schema).unwrap()
    }

    #[test]
    fn test_move_expands_to_load_and_go() {
        let wires = FocuserCommand::MoveAbs { ticks: 14880 }.render();
        let payloads: Vec<_> = wires.iter().map(|c| c.payload.as_str()).collect();
        assert_eq!(payloads, vec![":SN3A20", ":FG"]);
    }

    #[test]
    fn test_command_renders() {
        assert_eq!(FocuserCommand::Halt.render()[0].payload, ":FQ");
        assert_eq!(
            FocuserCommand::SyncPosition { ticks: 0x0200 }.render()[0].payload,
            ":SP0200"
        );
        assert_eq!(
            FocuserCommand::SetSpeed { speed: 0x10 }.render()[0].payload,
            ":SD10"
        );
        assert_eq!(
            FocuserCommand::SetHalfStep { on: true }.render()[0].payload,
            ":SH"
        );
        assert_eq!(
            FocuserCommand::SetHalfStep { on: false }.render()[0].payload,
            ":SF"
        );
        assert_eq!(
            FocuserCommand::StartTempConversion.render()[0].payload,
            ":C"
        );
    }

    #[test]
    fn test_parse_position_hex() {
        assert_eq!(parse_position(&record("3A20", &POSITION_SCHEMA)), Some(14880));
        assert_eq!(parse_position(&record("0000", &POSITION_SCHEMA)), Some(0));
        assert_eq!(parse_position(&record("zz", &POSITION_SCHEMA)), None);
    }

    #[test]
    fn test_parse_moving_flag() {
        assert_eq!(parse_moving(&record("01", &MOVING_SCHEMA)), Some(true));
        assert_eq!(parse_moving(&record("00", &MOVING_SCHEMA)), Some(false));
        assert_eq!(parse_moving(&record("XX", &MOVING_SCHEMA)), None);
    }

    #[test]
    fn test_parse_temperature_signed_half_degrees() {
        assert_eq!(
            parse_temperature(&record("0030", &TEMPERATURE_SCHEMA)),
            Some(24.0)
        );
        assert_eq!(
            parse_temperature(&record("FFF6", &TEMPERATURE_SCHEMA)),
            Some(-5.0)
        );
    }

    #[test]
    fn test_poll_plan_contents() {
        let plan = Focuser::new().poll_plan();
        let queries: Vec<_> = plan.iter().map(|q| q.query).collect();
        assert_eq!(
            queries,
            vec![QueryId(":GP"), QueryId(":GI"), QueryId(":GT")]
        );
    }
}
