//! Execution state machine.
//!
//! `ExecutionRunner` drives one `WorkflowExecution` to its next suspension
//! point or terminal state:
//! 1. Claims the execution (atomic `pending`/`paused` → `running` in the
//!    store; a losing claimant backs off with `ConcurrencyConflict`).
//! 2. Evaluates the workflow's conditions; if false the execution is
//!    `skipped` with reason `conditions_not_met` and no action runs.
//! 3. Dispatches actions in order from `current_step`, persisting the index
//!    after every step so a crash or pause resumes from the next unexecuted
//!    step, not from zero.
//! 4. `wait` suspends: the execution goes back to `pending` with
//!    `scheduled_at` at the resume instant and `current_step` pointing past
//!    the wait. `branch` jumps forward or completes early.
//! 5. Retryable failures re-queue the execution with exponential back-off up
//!    to `max_retries`; fatal failures mark it `failed` immediately.
//!
//! The owning workflow's status is re-checked at every step boundary, which
//! is what makes pause/archive cooperative: a handler already in flight
//! finishes, then the execution halts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use actions::{ActionContext, ActionError, ActionOutcome, HandlerRegistry};

use crate::error::EngineError;
use crate::models::{
    ActionStep, ExecutionError, ExecutionStatus, FailureKind, RetryAttempt, Workflow,
    WorkflowExecution, WorkflowStatus,
};
use crate::store::{StoreError, WorkflowStore};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of times a retryable step failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries. Retries are
    /// durable: the execution is re-queued, not slept on in-process.
    pub retry_base_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::minutes(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// How far a single `run` call got. Terminal outcomes are final; the others
/// mean the execution will be picked up again by a later scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Skipped,
    Failed,
    /// A `wait` step re-scheduled the execution for a future instant.
    Suspended,
    /// A retryable failure re-queued the execution with back-off.
    Retrying,
    /// The owning workflow was paused mid-run; the execution holds until the
    /// workflow is resumed.
    Paused,
}

// ---------------------------------------------------------------------------
// ExecutionRunner
// ---------------------------------------------------------------------------

/// Stateless orchestrator that advances a single execution.
pub struct ExecutionRunner {
    store: Arc<dyn WorkflowStore>,
    registry: HandlerRegistry,
    config: RunnerConfig,
}

impl ExecutionRunner {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: HandlerRegistry,
        config: RunnerConfig,
    ) -> Self {
        Self { store, registry, config }
    }

    /// Run the execution to its next suspension point or terminal state.
    ///
    /// # Errors
    /// [`EngineError::ConcurrencyConflict`] when another runner holds the
    /// claim; store errors otherwise. Action failures are recorded on the
    /// execution, not returned.
    #[instrument(skip(self, now), fields(execution_id = %execution_id))]
    pub async fn run(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, EngineError> {
        let mut execution = match self.store.claim_execution(execution_id).await {
            Ok(execution) => execution,
            Err(StoreError::ClaimConflict) => {
                return Err(EngineError::ConcurrencyConflict(execution_id))
            }
            Err(StoreError::NotFound) => {
                return Err(EngineError::ExecutionNotFound(execution_id))
            }
            Err(e) => return Err(e.into()),
        };

        let workflow = match self
            .store
            .get_workflow(execution.workspace_id, execution.workflow_id)
            .await
        {
            Ok(workflow) => workflow,
            Err(StoreError::NotFound) => {
                // Owning workflow vanished between enqueue and dispatch.
                return self
                    .skip(&mut execution, "workflow_missing", now)
                    .await
                    .map(|_| RunOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        // Dispatch-time gate: the workflow may have been paused or archived
        // between enqueue and dispatch. That is not an error.
        let first_run = execution.started_at.is_none();
        match workflow.status {
            WorkflowStatus::Active => {}
            WorkflowStatus::Paused if !first_run => {
                return self.hold(&mut execution).await.map(|_| RunOutcome::Paused);
            }
            status => {
                let reason = format!("workflow_{status}");
                return self
                    .skip(&mut execution, &reason, now)
                    .await
                    .map(|_| RunOutcome::Skipped);
            }
        }

        if first_run {
            execution.started_at = Some(now);
        }

        // Condition gate, only before the first step has run. Evaluation is
        // pure, so re-running it on a step-0 retry is harmless.
        if execution.current_step == 0 {
            let passes = workflow
                .conditions
                .as_ref()
                .is_none_or(|c| c.eval(&execution.working_context));
            if !passes {
                info!(workflow_id = %workflow.id, "conditions not met, skipping");
                return self
                    .skip(&mut execution, "conditions_not_met", now)
                    .await
                    .map(|_| RunOutcome::Skipped);
            }
        }

        self.step_loop(&mut execution, &workflow, now).await
    }

    // -----------------------------------------------------------------------
    // Step loop
    // -----------------------------------------------------------------------

    async fn step_loop(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, EngineError> {
        // The action sequence is a snapshot: edits to the definition made
        // while an execution is in flight apply to later executions only.
        let mut first_iteration = true;

        while execution.current_step < workflow.actions.len() {
            // Cooperative cancellation: re-check the workflow's status at
            // every step boundary after the first.
            if !first_iteration {
                let status = match self
                    .store
                    .get_workflow(execution.workspace_id, execution.workflow_id)
                    .await
                {
                    Ok(workflow) => workflow.status,
                    // Deleted out from under us; same as archived.
                    Err(StoreError::NotFound) => WorkflowStatus::Archived,
                    Err(e) => return Err(e.into()),
                };

                match status {
                    WorkflowStatus::Active => {}
                    WorkflowStatus::Paused => {
                        return self.hold(execution).await.map(|_| RunOutcome::Paused);
                    }
                    status => {
                        let reason = format!("workflow_{status}");
                        return self
                            .skip(execution, &reason, now)
                            .await
                            .map(|_| RunOutcome::Skipped);
                    }
                }
            }
            first_iteration = false;

            let step_index = execution.current_step;
            let step = &workflow.actions[step_index];

            // Branch is control flow interpreted here, not dispatched.
            if let ActionStep::Branch { condition, to_step } = step {
                if condition.eval(&execution.working_context) {
                    match to_step {
                        Some(jump_to) => {
                            info!(step = step_index, to = *jump_to, "branch taken");
                            execution.current_step = *jump_to;
                        }
                        None => {
                            info!(step = step_index, "branch completed execution early");
                            return self
                                .complete(execution, workflow, now)
                                .await
                                .map(|_| RunOutcome::Completed);
                        }
                    }
                } else {
                    execution.current_step += 1;
                }
                execution.attempts = 0;
                self.store.update_execution(execution).await?;
                continue;
            }

            let kind = step.kind();
            let Some(handler) = self.registry.get(kind) else {
                error!(step = step_index, kind, "no handler registered");
                return self
                    .fail(
                        execution,
                        step_index,
                        FailureKind::Fatal,
                        format!("no handler registered for action kind '{kind}'"),
                        now,
                    )
                    .await
                    .map(|_| RunOutcome::Failed);
            };

            let ctx = ActionContext {
                workflow_id: workflow.id,
                execution_id: execution.id,
                workspace_id: execution.workspace_id,
                now,
                context: execution.working_context.clone(),
            };

            match handler.execute(step.params(), &ctx).await {
                Ok(ActionOutcome::Success { patch }) => {
                    if let Some(patch) = patch {
                        merge_patch(&mut execution.working_context, patch);
                    }
                    execution.current_step += 1;
                    execution.attempts = 0;
                    self.store.update_execution(execution).await?;
                    info!(step = step_index, kind, "action succeeded");
                }

                Ok(ActionOutcome::Suspend { resume_at }) => {
                    execution.current_step += 1;
                    execution.attempts = 0;
                    execution.status = ExecutionStatus::Pending;
                    execution.scheduled_at = resume_at;
                    self.store.update_execution(execution).await?;
                    info!(step = step_index, %resume_at, "execution suspended");
                    return Ok(RunOutcome::Suspended);
                }

                Err(ActionError::Retryable(reason)) => {
                    execution.attempts += 1;
                    execution.retries.push(RetryAttempt {
                        step: step_index,
                        reason: reason.clone(),
                        at: now,
                    });

                    if execution.attempts > self.config.max_retries {
                        warn!(step = step_index, attempts = execution.attempts, "retries exhausted");
                        return self
                            .fail(execution, step_index, FailureKind::RetriesExhausted, reason, now)
                            .await
                            .map(|_| RunOutcome::Failed);
                    }

                    // current_step is left unchanged; the step is re-run on
                    // the next dispatch.
                    let delay = self.config.retry_base_delay
                        * 2i32.pow(execution.attempts.saturating_sub(1));
                    execution.status = ExecutionStatus::Pending;
                    execution.scheduled_at = now + delay;
                    self.store.update_execution(execution).await?;
                    warn!(
                        step = step_index,
                        attempt = execution.attempts,
                        max = self.config.max_retries,
                        ?delay,
                        reason,
                        "retryable action failure, re-queued"
                    );
                    return Ok(RunOutcome::Retrying);
                }

                Err(ActionError::Fatal(reason)) => {
                    error!(step = step_index, kind, reason, "fatal action failure");
                    return self
                        .fail(execution, step_index, FailureKind::Fatal, reason, now)
                        .await
                        .map(|_| RunOutcome::Failed);
                }
            }
        }

        self.complete(execution, workflow, now)
            .await
            .map(|_| RunOutcome::Completed)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    async fn complete(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        execution.status = ExecutionStatus::Completed;
        execution.completed_at.get_or_insert(now);
        self.store.update_execution(execution).await?;
        self.store.set_last_executed(workflow.id, now).await?;
        info!(workflow_id = %workflow.id, "execution completed");
        Ok(())
    }

    async fn skip(
        &self,
        execution: &mut WorkflowExecution,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        execution.status = ExecutionStatus::Skipped;
        execution.skip_reason = Some(reason.to_owned());
        execution.completed_at.get_or_insert(now);
        self.store.update_execution(execution).await?;
        info!(reason, "execution skipped");
        Ok(())
    }

    async fn hold(&self, execution: &mut WorkflowExecution) -> Result<(), EngineError> {
        execution.status = ExecutionStatus::Paused;
        self.store.update_execution(execution).await?;
        info!("execution paused until the workflow is resumed");
        Ok(())
    }

    async fn fail(
        &self,
        execution: &mut WorkflowExecution,
        step: usize,
        kind: FailureKind,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(ExecutionError { step, kind, message });
        execution.completed_at.get_or_insert(now);
        self.store.update_execution(execution).await?;
        Ok(())
    }
}

/// Shallow-merge a handler's context patch into the working context. Only
/// the working copy changes; the original trigger payload is untouched.
fn merge_patch(working: &mut Value, patch: Value) {
    match (working.as_object_mut(), patch) {
        (Some(target), Value::Object(entries)) => {
            for (key, value) in entries {
                target.insert(key, value);
            }
        }
        (None, patch @ Value::Object(_)) => *working = patch,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_overwrites_and_appends() {
        let mut working = json!({ "a": 1, "b": 2 });
        merge_patch(&mut working, json!({ "b": 3, "c": 4 }));
        assert_eq!(working, json!({ "a": 1, "b": 3, "c": 4 }));
    }

    #[test]
    fn non_object_patch_is_ignored() {
        let mut working = json!({ "a": 1 });
        merge_patch(&mut working, json!("not an object"));
        assert_eq!(working, json!({ "a": 1 }));
    }
}
