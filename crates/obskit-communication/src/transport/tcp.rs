//! TCP transport
//!
//! Connects to instruments exposed through serial-over-ethernet bridges.
//! Framing and close semantics match the serial transport; the only
//! difference is the byte carrier.

use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use obskit_core::{Result, TransportError};

use crate::transport::{
    read_until_from, ConnectionDriver, ConnectionParams, Transport, TransportCloseHandle,
    READ_SLICE,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP socket transport.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    closed: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Connect to the host and port in `params`
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        if params.driver != ConnectionDriver::Tcp {
            return Err(TransportError::InvalidParameters {
                reason: String::from("tcp transport requires the tcp driver"),
            }
            .into());
        }

        let peer = format!("{}:{}", params.host, params.tcp_port);
        let addr: SocketAddr = peer
            .to_socket_addrs()
            .map_err(|e| TransportError::InvalidParameters {
                reason: format!("cannot resolve {}: {}", peer, e),
            })?
            .next()
            .ok_or_else(|| TransportError::InvalidParameters {
                reason: format!("no address for {}", peer),
            })?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| {
            tracing::warn!("Failed to connect to {}: {}", peer, e);
            TransportError::PortUnavailable {
                port: peer.clone(),
                reason: e.to_string(),
            }
        })?;

        stream
            .set_read_timeout(Some(READ_SLICE))
            .map_err(|e| TransportError::Other {
                message: format!("cannot configure socket: {}", e),
            })?;
        let _ = stream.set_nodelay(true);

        tracing::info!("Connected to {}", peer);
        Ok(Self {
            stream,
            peer,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        use std::io::Write;
        self.stream
            .write_all(data)
            .map_err(|e| TransportError::WriteError {
                reason: e.to_string(),
            })?;
        Ok(data.len())
    }

    fn read_until(&mut self, terminators: &[u8], timeout: Duration) -> Result<(Vec<u8>, u8)> {
        read_until_from(&mut self.stream, terminators, timeout, &self.closed)
    }

    fn discard_pending(&mut self) {
        // Drain whatever is buffered without blocking
        if self.stream.set_nonblocking(true).is_err() {
            return;
        }
        let mut sink = [0u8; 64];
        while matches!(self.stream.read(&mut sink), Ok(n) if n > 0) {}
        let _ = self.stream.set_nonblocking(false);
        let _ = self.stream.set_read_timeout(Some(READ_SLICE));
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        // Unblocks a read stuck inside a slice
        let _ = self.stream.shutdown(Shutdown::Both);
        tracing::info!("Closed {}", self.peer);
    }

    fn close_handle(&self) -> TransportCloseHandle {
        TransportCloseHandle::new(self.closed.clone())
    }

    fn name(&self) -> String {
        self.peer.clone()
    }
}
