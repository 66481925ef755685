//! Background poll service
//!
//! Wraps a connected [`DeviceEngine`] in a spawned task that ticks the
//! poll loop on a fixed period and serves command requests in between
//! cycles. Callers talk to the task through a [`PollServiceHandle`];
//! commands are serialized with polling on the same task, so nothing ever
//! interleaves on the wire.

use std::time::Duration;

use obskit_core::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::device::DeviceCommand;
use crate::engine::DeviceEngine;
use crate::transport::TransportCloseHandle;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum ServiceRequest {
    Raw {
        line: String,
        expects_response: bool,
        reply: oneshot::Sender<Result<Option<String>>>,
    },
    Apply {
        command: DeviceCommand,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Background task running an engine's poll loop.
pub struct PollService;

impl PollService {
    /// Move a connected engine into a background task polling on `period`.
    pub fn spawn(mut engine: DeviceEngine, period: Duration) -> PollServiceHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (request_tx, mut request_rx) = mpsc::channel::<ServiceRequest>(32);
        let close_handle = engine.close_handle();

        let join = tokio::spawn(async move {
            let mut last_poll = Instant::now();
            // Short sleep to prevent busy looping between cycles
            let loop_delay = Duration::from_millis(10);

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                while let Ok(request) = request_rx.try_recv() {
                    match request {
                        ServiceRequest::Raw {
                            line,
                            expects_response,
                            reply,
                        } => {
                            let result = engine.send_command(&line, expects_response);
                            let _ = reply.send(result);
                        }
                        ServiceRequest::Apply { command, reply } => {
                            let result = engine.apply(&command);
                            let _ = reply.send(result);
                        }
                    }
                }

                if last_poll.elapsed() >= period {
                    if let Some(report) = engine.poll_tick().await {
                        if report.all_succeeded() {
                            debug!("poll cycle: {}", report.to_json());
                        } else {
                            warn!(
                                "poll cycle had {} failure(s): {}",
                                report.failures.len(),
                                report.to_json()
                            );
                        }
                    }
                    last_poll = Instant::now();
                }

                tokio::time::sleep(loop_delay).await;
            }

            engine.disconnect().await;
        });

        PollServiceHandle {
            join,
            shutdown_tx,
            request_tx,
            close_handle,
        }
    }
}

/// Handle to a running poll service.
pub struct PollServiceHandle {
    join: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
    request_tx: mpsc::Sender<ServiceRequest>,
    close_handle: Option<TransportCloseHandle>,
}

impl PollServiceHandle {
    /// Send a raw protocol line through the service task
    pub async fn send_raw(
        &self,
        line: impl Into<String>,
        expects_response: bool,
    ) -> Result<Option<String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(ServiceRequest::Raw {
                line: line.into(),
                expects_response,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Other(String::from("poll service is not running")))?;
        reply_rx
            .await
            .map_err(|_| Error::Other(String::from("poll service dropped the request")))?
    }

    /// Apply a typed device command through the service task
    pub async fn apply(&self, command: DeviceCommand) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(ServiceRequest::Apply {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Other(String::from("poll service is not running")))?;
        reply_rx
            .await
            .map_err(|_| Error::Other(String::from("poll service dropped the request")))?
    }

    /// Stop the service: unblock any in-flight read, signal the loop, and
    /// wait briefly for the task to notify listeners and exit.
    pub async fn shutdown(mut self) {
        if let Some(close) = self.close_handle.take() {
            close.close();
        }
        let _ = self.shutdown_tx.try_send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.join)
            .await
            .is_err()
        {
            self.join.abort();
        }
    }
}
