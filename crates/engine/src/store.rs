//! The `WorkflowStore` trait — the engine's only persistence dependency —
//! and an in-memory implementation used by tests and demos.
//!
//! The Postgres implementation lives in the `store` crate; the engine only
//! sees this trait. The load-bearing operation is [`WorkflowStore::claim_execution`]:
//! an atomic compare-and-set that moves an execution from `pending`/`paused`
//! to `running`, so that no two concurrent runners can advance the same
//! execution. This must be a store-level CAS, not an in-process mutex,
//! because the scheduler may run as multiple instances.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ExecutionStatus, Trigger, Workflow, WorkflowExecution, WorkflowStatus,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed error for store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// The execution was not in a claimable state — another runner got there
    /// first, or it already reached a terminal state.
    #[error("execution claim lost")]
    ClaimConflict,

    /// Insert rejected by the uniqueness constraint on open executions: one
    /// with the same workflow and exclusivity value already exists.
    #[error("duplicate open execution")]
    DuplicateExecution,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Filters for `list_workflows`. All filters are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    /// Workflows must carry every listed tag.
    pub tags: Vec<String>,
    pub folder: Option<String>,
    /// Case-insensitive substring match on the name.
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl WorkflowFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

/// One page of workflows plus the total match count.
#[derive(Debug, Clone)]
pub struct WorkflowPage {
    pub workflows: Vec<Workflow>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ------ workflows ------

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_workflow(&self, workspace_id: Uuid, id: Uuid) -> Result<Workflow, StoreError>;

    /// Filtered listing, ordered most-recently-modified first.
    async fn list_workflows(
        &self,
        workspace_id: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<WorkflowPage, StoreError>;

    /// All `active` workflows with a time trigger, across workspaces.
    async fn active_time_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// All `active` workflows with an event trigger in one workspace.
    async fn active_event_workflows(&self, workspace_id: Uuid)
        -> Result<Vec<Workflow>, StoreError>;

    async fn set_last_executed(
        &self,
        workflow_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ------ executions ------

    /// Persist a new execution.
    ///
    /// Implementations must enforce the exclusivity constraint atomically:
    /// inserting a non-terminal execution whose `exclusivity_value` collides
    /// with another open execution of the same workflow fails with
    /// [`StoreError::DuplicateExecution`]. A check-then-insert in the caller
    /// is not enough; concurrent enqueues race past it.
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    async fn get_execution(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowExecution, StoreError>;

    /// Execution history, newest first.
    async fn list_executions(
        &self,
        workspace_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    /// Atomically move the execution from `pending`/`paused` to `running`
    /// and return it. Fails with [`StoreError::ClaimConflict`] when the
    /// execution is in any other state.
    async fn claim_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError>;

    /// `pending` executions with `scheduled_at <= now`, oldest first, capped
    /// at `limit` (back-pressure: a tick never pulls unboundedly many).
    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    /// `paused` executions whose owning workflow is `active` again.
    async fn resumable_executions(&self, limit: usize)
        -> Result<Vec<WorkflowExecution>, StoreError>;

    /// Cancel all `pending`/`paused` executions of a workflow; returns how
    /// many were cancelled. Completed/failed history is never touched.
    async fn cancel_open_executions(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Creation time of the workflow's most recent execution, if any. Used
    /// by the recurrence gate ("fires once if no execution started today").
    async fn latest_execution_at(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, Workflow>,
    executions: HashMap<Uuid, WorkflowExecution>,
}

/// In-memory `WorkflowStore`, used by the engine tests and as a demo backend.
///
/// A plain mutex is fine here: no lock is ever held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if !inner.workflows.contains_key(&workflow.id) {
            return Err(StoreError::NotFound);
        }
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, workspace_id: Uuid, id: Uuid) -> Result<Workflow, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .workflows
            .get(&id)
            .filter(|w| w.workspace_id == workspace_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_workflows(
        &self,
        workspace_id: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<WorkflowPage, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let mut matches: Vec<Workflow> = inner
            .workflows
            .values()
            .filter(|w| w.workspace_id == workspace_id)
            .filter(|w| filter.status.is_none_or(|s| w.status == s))
            .filter(|w| filter.tags.iter().all(|t| w.tags.contains(t)))
            .filter(|w| filter.folder.as_ref().is_none_or(|f| w.folder.as_ref() == Some(f)))
            .filter(|w| {
                filter
                    .search
                    .as_ref()
                    .is_none_or(|q| w.name.to_lowercase().contains(&q.to_lowercase()))
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = matches.len();
        let workflows = matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit())
            .collect();

        Ok(WorkflowPage { workflows, total })
    }

    async fn active_time_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .workflows
            .values()
            .filter(|w| w.status == WorkflowStatus::Active)
            .filter(|w| matches!(w.trigger, Trigger::Time { .. }))
            .cloned()
            .collect())
    }

    async fn active_event_workflows(
        &self,
        workspace_id: Uuid,
    ) -> Result<Vec<Workflow>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .workflows
            .values()
            .filter(|w| w.workspace_id == workspace_id)
            .filter(|w| w.status == WorkflowStatus::Active)
            .filter(|w| matches!(w.trigger, Trigger::Event { .. }))
            .cloned()
            .collect())
    }

    async fn set_last_executed(
        &self,
        workflow_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let workflow = inner.workflows.get_mut(&workflow_id).ok_or(StoreError::NotFound)?;
        workflow.last_executed_at = Some(at);
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");

        // The mutex makes check-and-insert atomic, mirroring the partial
        // unique index the Postgres store relies on.
        if !execution.status.is_terminal() {
            if let Some(value) = &execution.exclusivity_value {
                let collision = inner.executions.values().any(|e| {
                    e.workflow_id == execution.workflow_id
                        && !e.status.is_terminal()
                        && e.exclusivity_value.as_ref() == Some(value)
                });
                if collision {
                    return Err(StoreError::DuplicateExecution);
                }
            }
        }

        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if !inner.executions.contains_key(&execution.id) {
            return Err(StoreError::NotFound);
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowExecution, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .executions
            .get(&id)
            .filter(|e| e.workspace_id == workspace_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_executions(
        &self,
        workspace_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let mut matches: Vec<WorkflowExecution> = inner
            .executions
            .values()
            .filter(|e| e.workspace_id == workspace_id)
            .filter(|e| workflow_id.is_none_or(|id| e.workflow_id == id))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn claim_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let execution = inner.executions.get_mut(&id).ok_or(StoreError::NotFound)?;

        match execution.status {
            ExecutionStatus::Pending | ExecutionStatus::Paused => {
                execution.status = ExecutionStatus::Running;
                Ok(execution.clone())
            }
            _ => Err(StoreError::ClaimConflict),
        }
    }

    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let mut due: Vec<WorkflowExecution> = inner
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending && e.scheduled_at <= now)
            .cloned()
            .collect();

        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn resumable_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Paused)
            .filter(|e| {
                inner
                    .workflows
                    .get(&e.workflow_id)
                    .is_some_and(|w| w.status == WorkflowStatus::Active)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cancel_open_executions(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let mut cancelled = 0;
        for execution in inner.executions.values_mut() {
            if execution.workflow_id == workflow_id
                && matches!(execution.status, ExecutionStatus::Pending | ExecutionStatus::Paused)
            {
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at.get_or_insert(now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn latest_execution_at(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.created_at)
            .max())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowDefinition;
    use serde_json::json;

    fn workflow(workspace_id: Uuid) -> Workflow {
        let def = WorkflowDefinition {
            name: "test".into(),
            status: WorkflowStatus::Active,
            trigger: Trigger::Event { event_type: "lead.created".into(), event_filter: None },
            conditions: None,
            actions: vec![],
            tags: vec!["onboarding".into()],
            folder: None,
            exclusivity_key: None,
            created_by: None,
        };
        Workflow::from_definition(workspace_id, def, Utc::now())
    }

    #[tokio::test]
    async fn claim_is_a_compare_and_set() {
        let store = MemoryStore::new();
        let ws = Uuid::new_v4();
        let wf = workflow(ws);
        store.insert_workflow(&wf).await.unwrap();

        let exec = WorkflowExecution::new(&wf, json!({}), Utc::now(), Utc::now());
        store.insert_execution(&exec).await.unwrap();

        let claimed = store.claim_execution(exec.id).await.unwrap();
        assert_eq!(claimed.status, ExecutionStatus::Running);

        // A second claim while running loses.
        assert!(matches!(
            store.claim_execution(exec.id).await,
            Err(StoreError::ClaimConflict)
        ));
    }

    #[tokio::test]
    async fn terminal_executions_are_not_claimable() {
        let store = MemoryStore::new();
        let ws = Uuid::new_v4();
        let wf = workflow(ws);
        store.insert_workflow(&wf).await.unwrap();

        let mut exec = WorkflowExecution::new(&wf, json!({}), Utc::now(), Utc::now());
        exec.status = ExecutionStatus::Completed;
        store.insert_execution(&exec).await.unwrap();

        assert!(matches!(
            store.claim_execution(exec.id).await,
            Err(StoreError::ClaimConflict)
        ));
    }

    #[tokio::test]
    async fn due_executions_are_ordered_and_capped() {
        let store = MemoryStore::new();
        let ws = Uuid::new_v4();
        let wf = workflow(ws);
        store.insert_workflow(&wf).await.unwrap();

        let now = Utc::now();
        for minutes in [30, 10, 20] {
            let exec = WorkflowExecution::new(
                &wf,
                json!({}),
                now - chrono::Duration::minutes(minutes),
                now,
            );
            store.insert_execution(&exec).await.unwrap();
        }
        // One in the future — must not be pulled.
        let future = WorkflowExecution::new(&wf, json!({}), now + chrono::Duration::hours(1), now);
        store.insert_execution(&future).await.unwrap();

        let due = store.due_executions(now, 2).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].scheduled_at <= due[1].scheduled_at);
        assert!(due.iter().all(|e| e.scheduled_at <= now));
    }

    #[tokio::test]
    async fn list_workflows_filters_and_paginates() {
        let store = MemoryStore::new();
        let ws = Uuid::new_v4();

        let mut a = workflow(ws);
        a.name = "Welcome drip".into();
        let mut b = workflow(ws);
        b.name = "Re-engagement".into();
        b.status = WorkflowStatus::Paused;
        store.insert_workflow(&a).await.unwrap();
        store.insert_workflow(&b).await.unwrap();

        let page = store
            .list_workflows(
                ws,
                &WorkflowFilter { status: Some(WorkflowStatus::Active), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.workflows[0].name, "Welcome drip");

        let page = store
            .list_workflows(
                ws,
                &WorkflowFilter { search: Some("welcome".into()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        // Other workspaces are invisible.
        let page = store
            .list_workflows(Uuid::new_v4(), &WorkflowFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn duplicate_open_execution_insert_is_rejected() {
        let store = MemoryStore::new();
        let ws = Uuid::new_v4();
        let mut wf = workflow(ws);
        wf.exclusivity_key = Some("lead_id".into());
        store.insert_workflow(&wf).await.unwrap();

        let now = Utc::now();
        let open = WorkflowExecution::new(&wf, json!({"lead_id": "42"}), now, now);
        store.insert_execution(&open).await.unwrap();

        // Same workflow, same key value, still open: the insert itself fails,
        // so two racing enqueues cannot both create an open execution.
        let duplicate = WorkflowExecution::new(&wf, json!({"lead_id": "42"}), now, now);
        assert!(matches!(
            store.insert_execution(&duplicate).await,
            Err(StoreError::DuplicateExecution)
        ));

        // A different key value is unaffected.
        let other = WorkflowExecution::new(&wf, json!({"lead_id": "7"}), now, now);
        store.insert_execution(&other).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_history_does_not_block_a_new_exclusive_execution() {
        let store = MemoryStore::new();
        let ws = Uuid::new_v4();
        let mut wf = workflow(ws);
        wf.exclusivity_key = Some("lead_id".into());
        store.insert_workflow(&wf).await.unwrap();

        let now = Utc::now();
        let mut done = WorkflowExecution::new(&wf, json!({"lead_id": "42"}), now, now);
        done.status = ExecutionStatus::Completed;
        store.insert_execution(&done).await.unwrap();

        // Only open executions count towards the constraint.
        let fresh = WorkflowExecution::new(&wf, json!({"lead_id": "42"}), now, now);
        store.insert_execution(&fresh).await.unwrap();

        // A duplicate recorded as skipped is terminal and may always be kept
        // for audit.
        let mut skipped = WorkflowExecution::new(&wf, json!({"lead_id": "42"}), now, now);
        skipped.status = ExecutionStatus::Skipped;
        skipped.skip_reason = Some("duplicate_execution".into());
        store.insert_execution(&skipped).await.unwrap();
    }
}
