//! Telemetry listener interface
//!
//! Defines the listener trait for engine and poll-cycle events

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::telemetry::{ChangeSet, QueryId, ResponseRecord};

/// Handle for a registered telemetry listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe
/// from engine events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TelemetryListenerHandle(pub String);

/// One query that failed during a poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct QueryFailure {
    /// The query mnemonic that failed.
    pub query: String,
    /// The rendered error message.
    pub message: String,
}

/// Summary of one completed poll cycle.
///
/// Emitted after every cycle, including cycles where some or all queries
/// failed. Serializable so services can log it as structured output.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Number of queries the cycle attempted.
    pub attempted: usize,
    /// Number of queries that produced an accepted record.
    pub succeeded: usize,
    /// The queries that failed, in plan order.
    pub failures: Vec<QueryFailure>,
    /// Wall-clock duration of the cycle in milliseconds.
    pub duration_ms: u64,
    /// When the cycle completed.
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    /// True when every attempted query succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Render the report as a JSON object for structured logs
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Listener trait for engine events
///
/// Implement this trait to receive notifications of connection lifecycle
/// changes and polled telemetry. Within one poll cycle, notifications
/// arrive in plan order; the cycle report is always last.
#[async_trait]
pub trait TelemetryListener: Send + Sync {
    /// Called when a device connection has been established and set up
    async fn on_connected(&self, _device: &str) {}

    /// Called when the device connection is closed
    async fn on_disconnected(&self) {}

    /// Called for each successfully polled record, with its change set
    async fn on_poll_result(
        &self,
        _query: QueryId,
        _record: &ResponseRecord,
        _changes: &ChangeSet,
    ) {
    }

    /// Called when a query in the poll plan fails
    async fn on_query_error(&self, _query: QueryId, _message: &str) {}

    /// Called once per cycle after all queries have been attempted
    async fn on_cycle_complete(&self, _report: &CycleReport) {}
}
