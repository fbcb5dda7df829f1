//! Engine facade — the public API surface used by the rest of the
//! application and by the scheduler driver.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use actions::{HandlerRegistry, WaitHandler};

use crate::error::EngineError;
use crate::models::{
    Trigger, Workflow, WorkflowDefinition, WorkflowExecution, WorkflowPatch, WorkflowStatus,
};
use crate::runner::{ExecutionRunner, RunnerConfig};
use crate::scheduler::{SchedulerConfig, TickSummary, TriggerScheduler};
use crate::store::{StoreError, WorkflowFilter, WorkflowPage, WorkflowStore};
use crate::validate::validate_definition;

/// Tuning for the whole engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub runner: RunnerConfig,
    pub scheduler: SchedulerConfig,
}

/// The workflow automation engine.
///
/// Construct one per process with the persistence backend and the handler
/// registry supplied by the side-effecting collaborators; the built-in
/// `wait` handler is registered automatically.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    runner: Arc<ExecutionRunner>,
    scheduler: TriggerScheduler,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        let mut registry = registry;
        if registry.get("wait").is_none() {
            registry.register("wait", Arc::new(WaitHandler));
        }

        let runner = Arc::new(ExecutionRunner::new(
            Arc::clone(&store),
            registry,
            config.runner,
        ));
        let scheduler =
            TriggerScheduler::new(Arc::clone(&store), Arc::clone(&runner), config.scheduler);

        Self { store, runner, scheduler }
    }

    // -----------------------------------------------------------------------
    // Workflow CRUD
    // -----------------------------------------------------------------------

    /// Validate and persist a new workflow. Nothing is created on a
    /// validation failure.
    pub async fn create_workflow(
        &self,
        workspace_id: Uuid,
        definition: WorkflowDefinition,
    ) -> Result<Workflow, EngineError> {
        let now = Utc::now();
        let workflow = Workflow::from_definition(workspace_id, definition, now);
        validate_definition(&workflow, now)?;
        self.store.insert_workflow(&workflow).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    /// Apply a partial update and re-validate the merged definition.
    pub async fn update_workflow(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        patch: WorkflowPatch,
    ) -> Result<Workflow, EngineError> {
        let mut workflow = self.fetch_workflow(workspace_id, id).await?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(EngineError::WorkflowNotFound(id));
        }

        let now = Utc::now();
        patch.apply(&mut workflow);
        workflow.updated_at = now;
        validate_definition(&workflow, now)?;
        self.store.update_workflow(&workflow).await?;
        Ok(workflow)
    }

    /// Soft delete: archive the workflow and cancel its open executions.
    /// Completed/failed history is retained.
    pub async fn delete_workflow(&self, workspace_id: Uuid, id: Uuid) -> Result<(), EngineError> {
        let mut workflow = self.fetch_workflow(workspace_id, id).await?;
        let now = Utc::now();
        workflow.status = WorkflowStatus::Archived;
        workflow.updated_at = now;
        self.store.update_workflow(&workflow).await?;

        let cancelled = self.store.cancel_open_executions(id, now).await?;
        info!(workflow_id = %id, cancelled, "workflow archived");
        Ok(())
    }

    /// Stop the workflow from triggering; in-flight executions halt at their
    /// next step boundary.
    pub async fn pause_workflow(&self, workspace_id: Uuid, id: Uuid) -> Result<(), EngineError> {
        self.set_status(workspace_id, id, WorkflowStatus::Paused).await
    }

    /// Make the workflow eligible for triggering again; held executions are
    /// picked up by the next scheduler tick.
    pub async fn resume_workflow(&self, workspace_id: Uuid, id: Uuid) -> Result<(), EngineError> {
        self.set_status(workspace_id, id, WorkflowStatus::Active).await
    }

    /// Filtered listing, most-recently-modified first.
    pub async fn get_workflows(
        &self,
        workspace_id: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<WorkflowPage, EngineError> {
        Ok(self.store.list_workflows(workspace_id, filter).await?)
    }

    pub async fn get_workflow(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Workflow, EngineError> {
        self.fetch_workflow(workspace_id, id).await
    }

    // -----------------------------------------------------------------------
    // Execution entry points
    // -----------------------------------------------------------------------

    /// Synchronous "run now": create an execution and immediately drive it to
    /// its next suspension point or terminal state.
    pub async fn execute_workflow(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        context: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self.fetch_workflow(workspace_id, id).await?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(EngineError::WorkflowNotFound(id));
        }

        let now = Utc::now();
        let execution = self.enqueue(&workflow, context, now, now).await?;
        if execution.status.is_terminal() {
            // Rejected by the exclusivity constraint; recorded, not run.
            return Ok(execution);
        }

        self.runner.run(execution.id, now).await?;
        Ok(self.store.get_execution(workspace_id, execution.id).await?)
    }

    /// Event-producer entry point: enqueue executions for every active
    /// workflow whose event trigger matches, returning what was enqueued.
    /// The executions run on the next scheduler tick.
    pub async fn enqueue_event(
        &self,
        workspace_id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let now = Utc::now();
        let mut enqueued = Vec::new();

        for workflow in self.store.active_event_workflows(workspace_id).await? {
            let Trigger::Event { event_type: wanted, event_filter } = &workflow.trigger else {
                continue;
            };
            if wanted != event_type {
                continue;
            }
            if let Some(filter) = event_filter {
                if !filter.eval(&payload) {
                    continue;
                }
            }

            let execution = self.enqueue(&workflow, payload.clone(), now, now).await?;
            enqueued.push(execution);
        }

        info!(event_type, count = enqueued.len(), "event enqueued");
        Ok(enqueued)
    }

    /// Execution history for a workspace, optionally narrowed to a workflow.
    pub async fn get_executions(
        &self,
        workspace_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        Ok(self
            .store
            .list_executions(workspace_id, workflow_id, limit, offset)
            .await?)
    }

    pub async fn get_execution(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowExecution, EngineError> {
        self.store
            .get_execution(workspace_id, id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::ExecutionNotFound(id),
                other => other.into(),
            })
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Run one scheduler tick. The external driver decides the cadence.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        self.scheduler.run_tick(now).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn fetch_workflow(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Workflow, EngineError> {
        self.store
            .get_workflow(workspace_id, id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::WorkflowNotFound(id),
                other => other.into(),
            })
    }

    async fn set_status(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), EngineError> {
        let mut workflow = self.fetch_workflow(workspace_id, id).await?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(EngineError::WorkflowNotFound(id));
        }
        workflow.status = status;
        workflow.updated_at = Utc::now();
        self.store.update_workflow(&workflow).await?;
        info!(workflow_id = %id, %status, "workflow status changed");
        Ok(())
    }

    /// Create a `pending` execution, honouring the workflow's exclusivity
    /// declaration: a duplicate open execution for the same context key is
    /// recorded as `skipped`, not queued. The store enforces the uniqueness
    /// constraint atomically, so concurrent enqueues cannot both slip
    /// through.
    async fn enqueue(
        &self,
        workflow: &Workflow,
        context: Value,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution, EngineError> {
        let mut execution = WorkflowExecution::new(workflow, context, scheduled_at, now);

        match self.store.insert_execution(&execution).await {
            Ok(()) => Ok(execution),
            Err(StoreError::DuplicateExecution) => {
                execution.status = crate::models::ExecutionStatus::Skipped;
                execution.skip_reason = Some("duplicate_execution".into());
                execution.completed_at = Some(now);
                self.store.insert_execution(&execution).await?;
                Ok(execution)
            }
            Err(e) => Err(e.into()),
        }
    }
}
