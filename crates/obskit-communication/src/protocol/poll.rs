//! Poll cycle coordination
//!
//! Drives the periodic telemetry cascade: each tick runs the installed
//! query plan in order, feeds successful records through the diff engine,
//! and notifies listeners. One failing query never stops the rest of the
//! cycle; its failure is recorded in the report and the cache keeps the
//! last good snapshot for that query.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use obskit_core::{
    CycleReport, DiffEngine, FieldSchema, QueryFailure, QueryId, TelemetryListener,
};
use tracing::warn;

use crate::protocol::codec::Command;
use crate::protocol::executor::CommandExecutor;

/// One query in a device's poll plan.
#[derive(Debug, Clone)]
pub struct PollQuery {
    /// Identifier used for caching and reporting.
    pub query: QueryId,
    /// The command sent on the wire.
    pub command: Command,
    /// Schema the response is decoded against.
    pub schema: FieldSchema,
}

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No plan installed; ticks do nothing.
    Idle,
    /// Plan installed; ticks poll.
    Polling,
}

/// Runs the telemetry plan against an executor, cycle by cycle.
///
/// The plan is fixed when it is installed, after the device handshake has
/// decided which optional queries apply. Ticks before that, or without an
/// open transport, are no-ops.
pub struct PollCoordinator {
    plan: Vec<PollQuery>,
    diff: DiffEngine,
    state: CoordinatorState,
}

impl Default for PollCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PollCoordinator {
    /// Create an idle coordinator with no plan
    pub fn new() -> Self {
        Self {
            plan: Vec::new(),
            diff: DiffEngine::new(),
            state: CoordinatorState::Idle,
        }
    }

    /// Install the query plan and start polling on subsequent ticks
    pub fn install_plan(&mut self, plan: Vec<PollQuery>) {
        self.plan = plan;
        self.state = CoordinatorState::Polling;
    }

    /// Drop the plan and cached snapshots, returning to idle
    pub fn reset(&mut self) {
        self.plan.clear();
        self.diff.clear();
        self.state = CoordinatorState::Idle;
    }

    /// Current lifecycle state
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// The installed plan, in execution order
    pub fn plan(&self) -> &[PollQuery] {
        &self.plan
    }

    /// Read access to the cached snapshots
    pub fn diff(&self) -> &DiffEngine {
        &self.diff
    }

    /// Run one poll cycle.
    ///
    /// Returns `None` without touching the transport when no plan is
    /// installed or the executor has no open connection. Otherwise runs
    /// every query in plan order, notifying listeners per result and once
    /// more with the cycle report; notifications are awaited in order.
    pub async fn tick(
        &mut self,
        executor: &mut CommandExecutor,
        listeners: &[Arc<dyn TelemetryListener>],
    ) -> Option<CycleReport> {
        if self.state != CoordinatorState::Polling || !executor.is_connected() {
            return None;
        }

        let started = Instant::now();
        let attempted = self.plan.len();
        let mut succeeded = 0;
        let mut failures = Vec::new();

        for i in 0..self.plan.len() {
            let entry = self.plan[i].clone();
            match executor.query(&entry.command, &entry.schema) {
                Ok(record) => {
                    let changes = self.diff.observe(&entry.schema, &record);
                    succeeded += 1;
                    for listener in listeners {
                        listener.on_poll_result(entry.query, &record, &changes).await;
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("poll {} failed: {}", entry.query, message);
                    failures.push(QueryFailure {
                        query: entry.query.to_string(),
                        message: message.clone(),
                    });
                    for listener in listeners {
                        listener.on_query_error(entry.query, &message).await;
                    }
                }
            }
        }

        let report = CycleReport {
            attempted,
            succeeded,
            failures,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };
        for listener in listeners {
            listener.on_cycle_complete(&report).await;
        }
        Some(report)
    }
}
