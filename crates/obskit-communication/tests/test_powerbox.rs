//! Power box handshake, command, and engine behavior over a scripted
//! transport

mod common;

use std::sync::Arc;

use common::{MockTransport, RecordingListener};
use obskit_communication::device::powerbox;
use obskit_communication::{
    CommandExecutor, DeviceCapabilities, DeviceCommand, DeviceEngine, DeviceProtocol, DewChannel,
    FocuserCommand, MotorCommand, PowerBox, PowerBoxCommand, PowerBoxVariant, RetryPolicy,
};
use obskit_core::{Error, ProtocolError, QueryId};

fn powerbox_executor(mock: MockTransport) -> CommandExecutor {
    let mut executor =
        CommandExecutor::new(powerbox::RESPONSE_TERMINATORS, RetryPolicy::default());
    executor.attach(Box::new(mock));
    executor
}

#[test]
fn test_handshake_identifies_basic_variant() {
    // Identity and firmware answer; the motor probe stays silent
    let mock = MockTransport::lines(&["PPB_OK\r", "PV:1.1\r"]);
    let writes = mock.writes();
    let mut executor = powerbox_executor(mock);

    let mut family = PowerBox::new();
    family.handshake(&mut executor).unwrap();

    assert_eq!(family.variant(), PowerBoxVariant::Basic);
    assert_eq!(family.firmware_version(), Some("1.1"));
    assert!(!family
        .capabilities()
        .contains(DeviceCapabilities::VARIABLE_OUTPUT));
    assert!(!family
        .capabilities()
        .contains(DeviceCapabilities::EXTERNAL_MOTOR));
    // P#, PV, then two silent motor probe attempts
    assert_eq!(
        writes.lock().unwrap().as_slice(),
        ["P#\n", "PV\n", "XS\n", "XS\n"]
    );
}

#[test]
fn test_handshake_identifies_advanced_with_motor() {
    let mock = MockTransport::lines(&["PPBA_OK\r", "PV:1.2\r", "XS:200\r"]);
    let mut executor = powerbox_executor(mock);

    let mut family = PowerBox::new();
    family.handshake(&mut executor).unwrap();

    assert_eq!(family.variant(), PowerBoxVariant::Advanced);
    assert!(family
        .capabilities()
        .contains(DeviceCapabilities::CURRENT_METRICS | DeviceCapabilities::EXTERNAL_MOTOR));

    let queries: Vec<_> = family.poll_plan().iter().map(|q| q.query).collect();
    assert_eq!(
        queries,
        vec![
            QueryId("PA"),
            QueryId("PS"),
            QueryId("PC"),
            QueryId("XS:1"),
            QueryId("XS:2")
        ]
    );
}

#[test]
fn test_handshake_survives_missing_firmware_and_motor() {
    // Only the identity answers; version and motor probes are optional
    let mock = MockTransport::lines(&["PPBM_OK\r"]);
    let mut executor = powerbox_executor(mock);

    let mut family = PowerBox::new();
    family.handshake(&mut executor).unwrap();

    assert_eq!(family.variant(), PowerBoxVariant::Advanced);
    assert_eq!(family.firmware_version(), None);
    assert!(!family
        .capabilities()
        .contains(DeviceCapabilities::EXTERNAL_MOTOR));
}

#[test]
fn test_handshake_rejects_unknown_identity() {
    let mock = MockTransport::lines(&["GARBAGE\r"]);
    let mut executor = powerbox_executor(mock);

    let err = PowerBox::new().handshake(&mut executor).unwrap_err();
    match err {
        Error::Protocol(ProtocolError::UnknownDevice { identity }) => {
            assert_eq!(identity, "GARBAGE");
        }
        other => panic!("expected UnknownDevice, got {:?}", other),
    }
}

#[test]
fn test_dew_duty_sends_padded_and_accepts_unpadded_echo() {
    let mock = MockTransport::lines(&["P6:7\r"]);
    let writes = mock.writes();
    let mut executor = powerbox_executor(mock);

    let command = PowerBoxCommand::SetDewDuty {
        channel: DewChannel::A,
        duty: 7,
    };
    executor.set(&command.render()).unwrap();
    assert_eq!(writes.lock().unwrap().as_slice(), ["P6:007\n"]);

    // A padded echo is not the acknowledgement the firmware sends
    let mut executor = powerbox_executor(MockTransport::lines(&["P6:007\r"]));
    let err = executor.set(&command.render()).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::AckMismatch { .. })
    ));
}

#[tokio::test]
async fn test_engine_connect_poll_disconnect() {
    let mock = MockTransport::lines(&[
        "PPBA_OK\r",
        "PV:1.2\r",
        "XS:200\r",
        "PA:1:0:0:1:0:1:24.1:0.30:50:0:1:0:1\r",
        "PS:12.1:2.1:25.4\r",
        "PC:1.80:0.70:0.50:0.60:7200000\r",
        "XS:1#0\r",
        "XS:2#3500\r",
    ]);
    let mut engine = DeviceEngine::new(Box::new(PowerBox::new()), RetryPolicy::default());

    let listener = Arc::new(RecordingListener::new());
    let calls = listener.calls.clone();
    let handle = engine.register_listener(listener);
    assert_eq!(engine.listener_count(), 1);

    engine.connect(Box::new(mock)).await.unwrap();
    assert!(engine.is_connected());
    assert!(engine.is_polling());
    assert_eq!(engine.device_name(), "Pegasus PPBA");
    assert_eq!(engine.firmware_version(), Some("1.2"));

    let report = engine.poll_tick().await.unwrap();
    assert_eq!(report.attempted, 5);
    assert!(report.all_succeeded());
    assert_eq!(engine.cached(QueryId("XS:2")).unwrap(), ["3500"]);

    engine.disconnect().await;
    assert!(!engine.is_connected());
    assert!(!engine.is_polling());
    assert!(engine.cached(QueryId("XS:2")).is_none());

    {
        let calls = calls.lock().await;
        assert_eq!(calls.first().unwrap().as_str(), "connected:Pegasus PPBA");
        assert_eq!(calls.last().unwrap().as_str(), "disconnected");
        assert!(calls.iter().any(|c| c == "cycle:5/5"));
    }

    // A second disconnect is a no-op and does not re-notify
    engine.disconnect().await;
    let calls = calls.lock().await;
    assert_eq!(calls.iter().filter(|c| c.as_str() == "disconnected").count(), 1);
    drop(calls);
    engine.unregister_listener(handle);
    assert_eq!(engine.listener_count(), 0);
}

#[tokio::test]
async fn test_engine_validates_capabilities_before_sending() {
    let mock = MockTransport::lines(&["PPB_OK\r"]);
    let writes = mock.writes();
    let mut engine = DeviceEngine::new(Box::new(PowerBox::new()), RetryPolicy::default());
    engine.connect(Box::new(mock)).await.unwrap();
    let writes_after_handshake = writes.lock().unwrap().len();

    // Basic variant has no variable output
    let err = engine
        .apply(&DeviceCommand::Power(PowerBoxCommand::SetVariableOutput {
            on: true,
        }))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::CapabilityNotAvailable { .. })
    ));

    // No motor controller was detected
    let err = engine
        .apply(&DeviceCommand::Motor(MotorCommand::Halt))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::CapabilityNotAvailable { .. })
    ));

    // Focuser commands never reach a power box
    let err = engine
        .apply(&DeviceCommand::Focuser(FocuserCommand::Halt))
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::Other { .. })));

    // Port numbers are validated before the wire
    let err = engine
        .apply(&DeviceCommand::Power(PowerBoxCommand::SetPort {
            port: 5,
            on: true,
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::Other { .. })));

    // None of the rejected commands produced traffic
    assert_eq!(writes.lock().unwrap().len(), writes_after_handshake);
}

#[tokio::test]
async fn test_engine_applies_port_motor_and_reboot_commands() {
    let mock = MockTransport::lines(&[
        "PPBA_OK\r",
        "PV:1.2\r",
        "XS:200\r",
        "P2:1\r",
        "XS:3#3500\r",
    ]);
    let writes = mock.writes();
    let mut engine = DeviceEngine::new(Box::new(PowerBox::new()), RetryPolicy::default());
    engine.connect(Box::new(mock)).await.unwrap();

    engine
        .apply(&DeviceCommand::Power(PowerBoxCommand::SetPort {
            port: 2,
            on: true,
        }))
        .unwrap();
    engine
        .apply(&DeviceCommand::Motor(MotorCommand::MoveAbs { ticks: 3500 }))
        .unwrap();
    // Halt and reboot send without expecting any reply
    engine
        .apply(&DeviceCommand::Motor(MotorCommand::Halt))
        .unwrap();
    engine
        .apply(&DeviceCommand::Power(PowerBoxCommand::Reboot))
        .unwrap();

    let writes = writes.lock().unwrap();
    assert_eq!(
        writes.as_slice(),
        ["P#\n", "PV\n", "XS\n", "P2:1\n", "XS:3#3500\n", "XS:6\n", "PF\n"]
    );
}
