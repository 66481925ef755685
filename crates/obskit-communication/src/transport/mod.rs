//! Byte transports for instrument links
//!
//! Provides the [`Transport`] trait the protocol layer drives, plus the
//! serial and TCP implementations. A transport carries raw bytes and knows
//! nothing about commands; its one framing duty is [`Transport::read_until`],
//! which collects bytes until a terminator arrives.
//!
//! Reads run against a short port timeout and loop until the caller's
//! deadline, so a close request from another thread is noticed within one
//! slice instead of hanging for the full deadline.

pub mod serial;
pub mod tcp;

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use obskit_core::{Result, TransportError};
use serde::{Deserialize, Serialize};

pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use tcp::TcpTransport;

/// Maximum number of payload bytes accepted in one response frame.
///
/// Matches the largest response any supported instrument produces, with
/// headroom. A frame that grows past this without a terminator is garbage.
pub const MAX_RESPONSE_BYTES: usize = 128;

/// Per-read timeout applied to the underlying port.
///
/// Kept short so deadlines and cross-thread close requests are honored
/// promptly; the framing loop keeps reading slices until the caller's
/// deadline expires.
pub(crate) const READ_SLICE: Duration = Duration::from_millis(50);

/// Connection driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDriver {
    /// Direct serial port (USB or RS-232)
    Serial,
    /// TCP socket, typically a serial-over-ethernet bridge
    Tcp,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    None,
    Even,
    Odd,
}

/// Parameters describing how to reach an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Which driver to use.
    pub driver: ConnectionDriver,
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Serial data bits (5-8).
    pub data_bits: u8,
    /// Serial stop bits (1 or 2).
    pub stop_bits: u8,
    /// Serial parity.
    pub parity: SerialParity,
    /// Hardware flow control.
    pub flow_control: bool,
    /// Host for the TCP driver.
    pub host: String,
    /// Port for the TCP driver.
    pub tcp_port: u16,
    /// Default read deadline per command attempt, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            host: String::from("127.0.0.1"),
            tcp_port: 8888,
            timeout_ms: 3000,
        }
    }
}

/// Handle for closing a transport from another thread.
///
/// Cloned out of a transport before it moves into a blocking loop. Calling
/// [`close`](TransportCloseHandle::close) makes any in-flight or future
/// read on that transport return [`TransportError::Closed`] within one
/// read slice.
#[derive(Debug, Clone)]
pub struct TransportCloseHandle(Arc<AtomicBool>);

impl TransportCloseHandle {
    /// Wrap a shared closed flag. Transport implementations hold the same
    /// flag and check it on every read slice.
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    /// Request the transport be closed
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether close has been requested
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A byte link to an instrument.
///
/// Implementations are blocking; the engine issues one exchange at a time.
pub trait Transport: Send {
    /// Write raw bytes, returning the count written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read until one of `terminators` arrives or `timeout` expires.
    ///
    /// Returns the payload bytes (the terminator excluded) together with
    /// the terminator that matched. Fails with `Timeout` when the deadline
    /// passes, `Overflow` when the payload exceeds [`MAX_RESPONSE_BYTES`],
    /// and `Closed` when the transport is closed mid-read.
    fn read_until(&mut self, terminators: &[u8], timeout: Duration) -> Result<(Vec<u8>, u8)>;

    /// Discard any buffered input. Best effort; failures are swallowed.
    fn discard_pending(&mut self);

    /// Whether the transport is still usable
    fn is_open(&self) -> bool;

    /// Close the transport, aborting any in-flight read
    fn close(&mut self);

    /// Handle that closes this transport from another thread
    fn close_handle(&self) -> TransportCloseHandle;

    /// Human-readable endpoint name for logs
    fn name(&self) -> String;
}

/// Open the transport selected by `params.driver`.
pub fn open_transport(params: &ConnectionParams) -> Result<Box<dyn Transport>> {
    match params.driver {
        ConnectionDriver::Serial => Ok(Box::new(SerialTransport::open(params)?)),
        ConnectionDriver::Tcp => Ok(Box::new(TcpTransport::open(params)?)),
    }
}

/// Framing loop shared by the transport implementations.
///
/// `reader` must be configured with a short read timeout (see
/// [`READ_SLICE`]); timed-out slices just advance the deadline check. The
/// `closed` flag is polled every iteration so another thread can abort a
/// blocked read.
pub(crate) fn read_until_from<R: Read>(
    reader: &mut R,
    terminators: &[u8],
    timeout: Duration,
    closed: &AtomicBool,
) -> Result<(Vec<u8>, u8)> {
    let deadline = Instant::now() + timeout;
    let mut payload: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        if closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }

        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(TransportError::ReadError {
                    reason: String::from("connection closed by peer"),
                }
                .into());
            }
            Ok(_) => {
                if terminators.contains(&byte[0]) {
                    return Ok((payload, byte[0]));
                }
                if payload.len() >= MAX_RESPONSE_BYTES {
                    return Err(TransportError::Overflow {
                        limit: MAX_RESPONSE_BYTES,
                    }
                    .into());
                }
                payload.push(byte[0]);
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                // Slice expired with no data; fall through to the deadline check
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(TransportError::ReadError {
                    reason: e.to_string(),
                }
                .into());
            }
        }

        if Instant::now() >= deadline {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves scripted bytes one at a time, then times out forever.
    struct ScriptedReader {
        bytes: VecDeque<u8>,
    }

    impl ScriptedReader {
        fn new(data: &[u8]) -> Self {
            Self {
                bytes: data.iter().copied().collect(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.bytes.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            }
        }
    }

    fn open_flag() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_read_until_frames_on_terminator() {
        let mut reader = ScriptedReader::new(b"PPBA_OK\n");
        let closed = open_flag();
        let (payload, matched) =
            read_until_from(&mut reader, &[b'\n'], Duration::from_millis(200), &closed).unwrap();
        assert_eq!(payload, b"PPBA_OK");
        assert_eq!(matched, b'\n');
    }

    #[test]
    fn test_read_until_reports_which_terminator_matched() {
        let mut reader = ScriptedReader::new(b"OK\r");
        let closed = open_flag();
        let (payload, matched) = read_until_from(
            &mut reader,
            &[b'\n', b'\r'],
            Duration::from_millis(200),
            &closed,
        )
        .unwrap();
        assert_eq!(payload, b"OK");
        assert_eq!(matched, b'\r');
    }

    #[test]
    fn test_read_until_terminator_first_gives_empty_payload() {
        let mut reader = ScriptedReader::new(b"\n");
        let closed = open_flag();
        let (payload, matched) =
            read_until_from(&mut reader, &[b'\n'], Duration::from_millis(200), &closed).unwrap();
        assert!(payload.is_empty());
        assert_eq!(matched, b'\n');
    }

    #[test]
    fn test_read_until_times_out_on_silence() {
        let mut reader = ScriptedReader::new(b"");
        let closed = open_flag();
        let err = read_until_from(&mut reader, &[b'\n'], Duration::from_millis(20), &closed)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_read_until_overflows_without_terminator() {
        let noise = vec![b'x'; MAX_RESPONSE_BYTES + 10];
        let mut reader = ScriptedReader::new(&noise);
        let closed = open_flag();
        let err = read_until_from(&mut reader, &[b'\n'], Duration::from_secs(5), &closed)
            .unwrap_err();
        assert!(matches!(
            err,
            obskit_core::Error::Transport(TransportError::Overflow { .. })
        ));
    }

    #[test]
    fn test_read_until_honors_close_flag() {
        let mut reader = ScriptedReader::new(b"data that never arrives\n");
        let closed = AtomicBool::new(true);
        let err = read_until_from(&mut reader, &[b'\n'], Duration::from_secs(5), &closed)
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_read_until_full_frame_fits() {
        let mut data = vec![b'a'; MAX_RESPONSE_BYTES];
        data.push(b'\n');
        let mut reader = ScriptedReader::new(&data);
        let closed = open_flag();
        let (payload, _) =
            read_until_from(&mut reader, &[b'\n'], Duration::from_secs(5), &closed).unwrap();
        assert_eq!(payload.len(), MAX_RESPONSE_BYTES);
    }
}
