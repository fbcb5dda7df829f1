//! Trigger scheduler — the "one tick" operation invoked by an external
//! periodic caller (process scheduler / cron). The engine never
//! self-schedules.
//!
//! Each tick:
//! 1. Pulls a bounded batch of due `pending` executions (plus `paused`
//!    executions whose workflow is active again) and hands each to the
//!    execution state machine.
//! 2. Evaluates recurrence rules on active time-triggered workflows and
//!    enqueues fresh executions for the ones that fire.
//!
//! Per-item failures are isolated: they are recorded on that execution and
//! counted in the summary, and never abort the tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::models::{Trigger, WorkflowExecution};
use crate::runner::{ExecutionRunner, RunOutcome};
use crate::store::WorkflowStore;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum executions pulled into memory per tick.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { batch_size: 50 }
    }
}

// ---------------------------------------------------------------------------
// Tick summary
// ---------------------------------------------------------------------------

/// Aggregate counts for one tick. The tick itself always completes; callers
/// inspect the summary instead of catching per-item errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Executions handed to the state machine this tick.
    pub dispatched: usize,
    pub completed: usize,
    pub suspended: usize,
    pub retrying: usize,
    pub skipped: usize,
    pub failed: usize,
    pub paused: usize,
    /// Claims lost to a concurrent runner — already being handled.
    pub conflicts: usize,
    /// Per-item errors that were isolated and recorded.
    pub errors: usize,
    /// New executions enqueued by time triggers.
    pub triggered: usize,
}

// ---------------------------------------------------------------------------
// TriggerScheduler
// ---------------------------------------------------------------------------

pub struct TriggerScheduler {
    store: Arc<dyn WorkflowStore>,
    runner: Arc<ExecutionRunner>,
    config: SchedulerConfig,
}

impl TriggerScheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        runner: Arc<ExecutionRunner>,
        config: SchedulerConfig,
    ) -> Self {
        Self { store, runner, config }
    }

    /// Run one scheduler tick at the injected instant.
    ///
    /// # Errors
    /// Only store-level failures on the batch queries propagate; everything
    /// per-item is recorded in the summary.
    #[instrument(skip(self))]
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        let mut summary = TickSummary::default();

        let mut batch = self.store.due_executions(now, self.config.batch_size).await?;
        batch.extend(self.store.resumable_executions(self.config.batch_size).await?);

        for execution in batch {
            summary.dispatched += 1;
            match self.runner.run(execution.id, now).await {
                Ok(RunOutcome::Completed) => summary.completed += 1,
                Ok(RunOutcome::Suspended) => summary.suspended += 1,
                Ok(RunOutcome::Retrying) => summary.retrying += 1,
                Ok(RunOutcome::Skipped) => summary.skipped += 1,
                Ok(RunOutcome::Failed) => summary.failed += 1,
                Ok(RunOutcome::Paused) => summary.paused += 1,
                Err(EngineError::ConcurrencyConflict(_)) => summary.conflicts += 1,
                Err(e) => {
                    // Isolated: this execution's failure never aborts the tick.
                    warn!(execution_id = %execution.id, error = %e, "tick item failed");
                    summary.errors += 1;
                }
            }
        }

        summary.triggered = self.fire_time_triggers(now).await?;

        info!(?summary, "scheduler tick finished");
        Ok(summary)
    }

    /// Evaluate recurrence rules on active time-triggered workflows and
    /// enqueue an execution for each rule that fires.
    async fn fire_time_triggers(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let mut triggered = 0;

        for workflow in self.store.active_time_workflows().await? {
            let Trigger::Time { schedule } = &workflow.trigger else {
                continue;
            };

            // The gate is the latest execution of any origin: "fires once if
            // no execution has started today", not once per completion.
            let last = match self.store.latest_execution_at(workflow.id).await {
                Ok(last) => last.max(workflow.last_executed_at),
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "trigger check failed");
                    continue;
                }
            };

            if !schedule.fires(last, now) {
                continue;
            }

            let context = json!({ "triggered_by": "scheduled", "timestamp": now });
            let execution = WorkflowExecution::new(&workflow, context, now, now);
            match self.store.insert_execution(&execution).await {
                Ok(()) => {
                    info!(workflow_id = %workflow.id, execution_id = %execution.id, "time trigger fired");
                    triggered += 1;
                }
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "failed to enqueue execution");
                }
            }
        }

        Ok(triggered)
    }
}
