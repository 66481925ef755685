#![allow(dead_code)]
//! Scripted transport and recording listener shared by the protocol tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use obskit_communication::{Transport, TransportCloseHandle};
use obskit_core::{
    ChangeSet, CycleReport, QueryId, ResponseRecord, Result, TelemetryListener, TransportError,
};

/// One scripted outcome for the next read
pub enum Reply {
    /// Raw bytes as the device would send them, terminator included
    Line(Vec<u8>),
    /// No response; the read times out
    Silence,
}

impl Reply {
    pub fn line(text: &str) -> Self {
        Reply::Line(text.as_bytes().to_vec())
    }
}

/// Transport fed from a reply script.
///
/// Each read consumes the next scripted reply. A reply carrying no
/// terminator the reader accepts times out, the way a real link does when
/// the device frames with the other terminator. The executor rewrites the
/// command on every attempt, so scripts hold one reply per attempt.
pub struct MockTransport {
    replies: VecDeque<Reply>,
    writes: Arc<Mutex<Vec<String>>>,
    fail_writes: bool,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn scripted(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_writes: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Script from device lines, terminator included in each
    pub fn lines(lines: &[&str]) -> Self {
        Self::scripted(lines.iter().map(|l| Reply::line(l)).collect())
    }

    /// No scripted replies; every read times out
    pub fn silent() -> Self {
        Self::scripted(Vec::new())
    }

    /// Make every write fail
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Shared log of everything written, decoded lossily
    pub fn writes(&self) -> Arc<Mutex<Vec<String>>> {
        self.writes.clone()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        if self.fail_writes {
            return Err(TransportError::WriteError {
                reason: String::from("scripted write failure"),
            }
            .into());
        }
        self.writes
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(data.len())
    }

    fn read_until(&mut self, terminators: &[u8], timeout: Duration) -> Result<(Vec<u8>, u8)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        match self.replies.pop_front() {
            Some(Reply::Line(bytes)) => {
                match bytes.iter().position(|b| terminators.contains(b)) {
                    Some(pos) => Ok((bytes[..pos].to_vec(), bytes[pos])),
                    None => Err(TransportError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .into()),
                }
            }
            Some(Reply::Silence) | None => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    fn discard_pending(&mut self) {}

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn close_handle(&self) -> TransportCloseHandle {
        TransportCloseHandle::new(self.closed.clone())
    }

    fn name(&self) -> String {
        String::from("mock")
    }
}

/// Listener that records every callback as a string
pub struct RecordingListener {
    pub calls: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl TelemetryListener for RecordingListener {
    async fn on_connected(&self, device: &str) {
        self.calls.lock().await.push(format!("connected:{}", device));
    }

    async fn on_disconnected(&self) {
        self.calls.lock().await.push(String::from("disconnected"));
    }

    async fn on_poll_result(&self, query: QueryId, _record: &ResponseRecord, changes: &ChangeSet) {
        self.calls
            .lock()
            .await
            .push(format!("poll:{}:groups={}", query, changes.groups.join("+")));
    }

    async fn on_query_error(&self, query: QueryId, message: &str) {
        self.calls
            .lock()
            .await
            .push(format!("error:{}:{}", query, message));
    }

    async fn on_cycle_complete(&self, report: &CycleReport) {
        self.calls
            .lock()
            .await
            .push(format!("cycle:{}/{}", report.succeeded, report.attempted));
    }
}
