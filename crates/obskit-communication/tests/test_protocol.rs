//! Executor retry/acknowledgement behavior and poll coordinator cycles,
//! exercised over a scripted transport

mod common;

use std::sync::Arc;

use common::{MockTransport, RecordingListener, Reply};
use obskit_communication::device::powerbox::{METRICS_SCHEMA, STATUS_SCHEMA, SUPPLY_SCHEMA};
use obskit_communication::{
    decode_boundary, encode, Command, CommandExecutor, PollCoordinator, PollQuery,
    ResponseTerminators, RetryPolicy, Transport,
};
use obskit_core::{Error, ProtocolError, TelemetryListener};
use proptest::prelude::*;

const STATUS_LINE: &str = "PA:1:0:0:1:0:1:24.1:0.30:50:0:1:0:1";

fn executor_over(mock: MockTransport) -> CommandExecutor {
    let mut executor = CommandExecutor::new(
        ResponseTerminators::with_fallback(b'\r', b'\n'),
        RetryPolicy::default(),
    );
    executor.attach(Box::new(mock));
    executor
}

#[test]
fn test_silence_exhausts_exactly_the_attempt_budget() {
    let mock = MockTransport::silent();
    let writes = mock.writes();
    let mut executor = executor_over(mock);

    let err = executor.exchange(&Command::new("PA", b'\n')).unwrap_err();
    match err {
        Error::Protocol(ProtocolError::NoResponse { command, attempts }) => {
            assert_eq!(command, "PA");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected NoResponse, got {:?}", other),
    }
    // One write per attempt, no more
    assert_eq!(writes.lock().unwrap().as_slice(), ["PA\n", "PA\n"]);
}

#[test]
fn test_empty_response_consumes_an_attempt() {
    let mock = MockTransport::lines(&["\r", "PPBA_OK\r"]);
    let writes = mock.writes();
    let mut executor = executor_over(mock);

    let line = executor.exchange(&Command::new("P#", b'\n')).unwrap();
    assert_eq!(line, "PPBA_OK");
    assert_eq!(writes.lock().unwrap().len(), 2);
}

#[test]
fn test_write_failures_consume_attempts() {
    let mock = MockTransport::lines(&["PPBA_OK\r"]).failing_writes();
    let mut executor = executor_over(mock);

    let err = executor.exchange(&Command::new("P#", b'\n')).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::NoResponse { attempts: 2, .. })
    ));
}

#[test]
fn test_fallback_promotion_sticks_for_later_exchanges() {
    // Device frames with LF while the family declares CR primary. The
    // first read finds no CR and times out; the retry reads with LF,
    // succeeds, and promotes it.
    let mock = MockTransport::lines(&["PPBA_OK\n", "PPBA_OK\n", "PV:1.2\n"]);
    let writes = mock.writes();
    let mut executor = executor_over(mock);

    let line = executor.exchange(&Command::new("P#", b'\n')).unwrap();
    assert_eq!(line, "PPBA_OK");
    assert_eq!(executor.terminators().primary, b'\n');
    assert_eq!(executor.terminators().fallback, Some(b'\r'));

    // The next exchange frames with LF on the first attempt
    let line = executor.exchange(&Command::new("PV", b'\n')).unwrap();
    assert_eq!(line, "PV:1.2");
    assert_eq!(writes.lock().unwrap().len(), 3);
}

#[test]
fn test_closed_transport_aborts_without_writing() {
    let mock = MockTransport::lines(&["PPBA_OK\r"]);
    let writes = mock.writes();
    let handle = mock.close_handle();
    let mut executor = executor_over(mock);

    handle.close();
    let err = executor.exchange(&Command::new("P#", b'\n')).unwrap_err();
    assert!(err.is_closed());
    assert!(writes.lock().unwrap().is_empty());
}

#[test]
fn test_set_accepts_matching_echo() {
    let mut executor = executor_over(MockTransport::lines(&["P1:1\r"]));
    executor.set(&Command::new("P1:1", b'\n')).unwrap();
}

#[test]
fn test_set_rejects_wrong_echo() {
    let mut executor = executor_over(MockTransport::lines(&["P1:0\r"]));
    let err = executor.set(&Command::new("P1:1", b'\n')).unwrap_err();
    match err {
        Error::Protocol(ProtocolError::AckMismatch { expected, actual }) => {
            assert_eq!(expected, "P1:1");
            assert_eq!(actual, "P1:0");
        }
        other => panic!("expected AckMismatch, got {:?}", other),
    }
}

#[test]
fn test_set_silence_surfaces_as_empty_ack() {
    let mut executor = executor_over(MockTransport::silent());
    let err = executor.set(&Command::new("P1:1", b'\n')).unwrap_err();
    match err {
        Error::Protocol(ProtocolError::AckMismatch { expected, actual }) => {
            assert_eq!(expected, "P1:1");
            assert_eq!(actual, "");
        }
        other => panic!("expected AckMismatch, got {:?}", other),
    }
}

#[test]
fn test_send_only_never_reads() {
    // A silent transport would fail any read; send_only must not care
    let mock = MockTransport::silent();
    let writes = mock.writes();
    let mut executor = executor_over(mock);

    executor.send_only(&Command::new("PF", b'\n')).unwrap();
    assert_eq!(writes.lock().unwrap().as_slice(), ["PF\n"]);
}

fn powerbox_plan() -> Vec<PollQuery> {
    vec![
        PollQuery {
            query: STATUS_SCHEMA.query,
            command: Command::new("PA", b'\n'),
            schema: STATUS_SCHEMA,
        },
        PollQuery {
            query: SUPPLY_SCHEMA.query,
            command: Command::new("PS", b'\n'),
            schema: SUPPLY_SCHEMA,
        },
        PollQuery {
            query: METRICS_SCHEMA.query,
            command: Command::new("PC", b'\n'),
            schema: METRICS_SCHEMA,
        },
    ]
}

#[tokio::test]
async fn test_tick_is_a_noop_until_a_plan_is_installed() {
    let mock = MockTransport::lines(&[]);
    let writes = mock.writes();
    let mut executor = executor_over(mock);
    let mut coordinator = PollCoordinator::new();

    let listeners: Vec<Arc<dyn TelemetryListener>> = Vec::new();
    assert!(coordinator.tick(&mut executor, &listeners).await.is_none());
    assert!(writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tick_is_a_noop_without_a_transport() {
    let mut executor =
        CommandExecutor::new(ResponseTerminators::new(b'\n'), RetryPolicy::default());
    let mut coordinator = PollCoordinator::new();
    coordinator.install_plan(powerbox_plan());

    let listeners: Vec<Arc<dyn TelemetryListener>> = Vec::new();
    assert!(coordinator.tick(&mut executor, &listeners).await.is_none());
}

#[tokio::test]
async fn test_cycle_continues_past_a_failing_query() {
    // PS answers with too few fields; PA and PC still run
    let mock = MockTransport::lines(&[
        "PA:1:0:0:1:0:1:24.1:0.30:50:0:1:0:1\r",
        "PS:12.1\r",
        "PC:1.80:0.70:0.50:0.60:7200000\r",
    ]);
    let mut executor = executor_over(mock);
    let mut coordinator = PollCoordinator::new();
    coordinator.install_plan(powerbox_plan());

    let listener = Arc::new(RecordingListener::new());
    let calls = listener.calls.clone();
    let listeners: Vec<Arc<dyn TelemetryListener>> = vec![listener];

    let report = coordinator.tick(&mut executor, &listeners).await.unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].query, "PS");
    assert!(!report.all_succeeded());

    let calls = calls.lock().await;
    assert_eq!(calls.len(), 4);
    assert!(calls[0].starts_with("poll:PA:"));
    assert!(calls[1].starts_with("error:PS:"));
    assert!(calls[2].starts_with("poll:PC:"));
    assert_eq!(calls[3].as_str(), "cycle:2/3");
}

#[tokio::test]
async fn test_change_reporting_across_cycles() {
    let changed = "PA:1:0:0:1:0:1:24.5:0.30:50:0:1:0:1";
    let mock = MockTransport::scripted(vec![
        Reply::line(&format!("{}\r", STATUS_LINE)),
        Reply::line(&format!("{}\r", STATUS_LINE)),
        Reply::line(&format!("{}\r", changed)),
    ]);
    let mut executor = executor_over(mock);
    let mut coordinator = PollCoordinator::new();
    coordinator.install_plan(vec![PollQuery {
        query: STATUS_SCHEMA.query,
        command: Command::new("PA", b'\n'),
        schema: STATUS_SCHEMA,
    }]);

    let listener = Arc::new(RecordingListener::new());
    let calls = listener.calls.clone();
    let listeners: Vec<Arc<dyn TelemetryListener>> = vec![listener];

    for _ in 0..3 {
        coordinator.tick(&mut executor, &listeners).await.unwrap();
    }

    let calls = calls.lock().await;
    // First observation reports every group as changed
    assert!(calls[0].contains("power_ports"));
    assert!(calls[0].contains("indicators"));
    // Identical record reports nothing
    assert_eq!(calls[2].as_str(), "poll:PA:groups=");
    // Only the temperature moved; index 6 belongs to the environment group
    assert_eq!(calls[4].as_str(), "poll:PA:groups=environment");
}

#[tokio::test]
async fn test_reset_forgets_cached_telemetry() {
    let mock = MockTransport::scripted(vec![
        Reply::line(&format!("{}\r", STATUS_LINE)),
        Reply::line(&format!("{}\r", STATUS_LINE)),
    ]);
    let mut executor = executor_over(mock);
    let mut coordinator = PollCoordinator::new();
    let plan = vec![PollQuery {
        query: STATUS_SCHEMA.query,
        command: Command::new("PA", b'\n'),
        schema: STATUS_SCHEMA,
    }];
    coordinator.install_plan(plan.clone());

    let listener = Arc::new(RecordingListener::new());
    let calls = listener.calls.clone();
    let listeners: Vec<Arc<dyn TelemetryListener>> = vec![listener];

    coordinator.tick(&mut executor, &listeners).await.unwrap();
    coordinator.reset();
    assert!(coordinator.diff().cached(STATUS_SCHEMA.query).is_none());

    // Same record again after a reset is a fresh first observation
    coordinator.install_plan(plan);
    coordinator.tick(&mut executor, &listeners).await.unwrap();
    let calls = calls.lock().await;
    assert!(calls[2].contains("power_ports"));
}

proptest! {
    // Encoding a payload and stripping the boundary from what the
    // transport hands back restores the payload byte for byte.
    #[test]
    fn prop_encode_then_boundary_strip_round_trips(payload in "[ -~]{0,64}") {
        let command = Command::new(payload.clone(), b'\n');
        let encoded = encode(&command);
        prop_assert_eq!(encoded.last(), Some(&b'\n'));
        // The transport excludes the matched terminator from the payload
        let raw = &encoded[..encoded.len() - 1];
        prop_assert_eq!(decode_boundary(raw, b'\n'), payload);
    }

    // NUL padding after the payload is boundary, not data
    #[test]
    fn prop_boundary_strip_drops_nul_padding(payload in "[ -~]{1,32}", nuls in 0usize..4) {
        let mut raw = payload.clone().into_bytes();
        raw.extend(std::iter::repeat(0u8).take(nuls));
        prop_assert_eq!(decode_boundary(&raw, b'\r'), payload);
    }
}
