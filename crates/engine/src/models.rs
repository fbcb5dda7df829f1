//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow and an execution
//! look like in memory. They serialise to/from the JSONB `definition` column
//! of the `workflows` table and the columns of `workflow_executions`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::condition::Condition;
use crate::schedule::Schedule;

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow's executions are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Created by an event producer (lead activity, campaign lifecycle, …).
    Event {
        /// Event name the producer publishes, e.g. `lead.replied`.
        event_type: String,
        /// Optional filter evaluated against the event payload before an
        /// execution is enqueued.
        #[serde(default)]
        event_filter: Option<Condition>,
    },
    /// Created by the trigger scheduler according to a schedule.
    Time { schedule: Schedule },
}

// ---------------------------------------------------------------------------
// ActionStep
// ---------------------------------------------------------------------------

/// A single step in a workflow's ordered action sequence.
///
/// The vocabulary is closed: each kind is a tagged variant with its own
/// parameter schema, validated at workflow-save time rather than at dispatch
/// time. `wait` and `branch` are control flow; the rest are side effects
/// performed by registered handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionStep {
    SendEmail {
        template: String,
        #[serde(default)]
        subject: Option<String>,
    },
    Wait {
        #[serde(default)]
        days: i64,
        #[serde(default)]
        hours: i64,
        #[serde(default)]
        minutes: i64,
    },
    UpdateRecord {
        record: String,
        fields: serde_json::Map<String, Value>,
    },
    CallWebhook {
        url: String,
        #[serde(default)]
        payload: Option<Value>,
    },
    Branch {
        condition: Condition,
        /// Step index to jump to when the condition holds; `None` completes
        /// the execution early.
        #[serde(default)]
        to_step: Option<usize>,
    },
    AddTag {
        tag: String,
    },
}

impl ActionStep {
    /// The handler-registry key for this step.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendEmail { .. } => "send_email",
            Self::Wait { .. } => "wait",
            Self::UpdateRecord { .. } => "update_record",
            Self::CallWebhook { .. } => "call_webhook",
            Self::Branch { .. } => "branch",
            Self::AddTag { .. } => "add_tag",
        }
    }

    /// The step's parameters as a JSON object (the variant's fields, without
    /// the `kind` tag), as passed to the registered handler.
    pub fn params(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("kind");
        }
        value
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete persisted workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub trigger: Trigger,
    /// Workflow-level gate; `None` means "always run".
    #[serde(default)]
    pub conditions: Option<Condition>,
    pub actions: Vec<ActionStep>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folder: Option<String>,
    /// Context key enforcing at-most-once semantics: when set, only one
    /// non-terminal execution may exist per distinct value of this key.
    #[serde(default)]
    pub exclusivity_key: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Materialise a workflow from a submitted definition.
    pub fn from_definition(
        workspace_id: Uuid,
        definition: WorkflowDefinition,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: definition.name,
            status: definition.status,
            trigger: definition.trigger,
            conditions: definition.conditions,
            actions: definition.actions,
            tags: definition.tags,
            folder: definition.folder,
            exclusivity_key: definition.exclusivity_key,
            created_by: definition.created_by.clone(),
            last_modified_by: definition.created_by,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A workflow definition as submitted to `create_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Option<Condition>,
    #[serde(default)]
    pub actions: Vec<ActionStep>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub exclusivity_key: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// A partial update as submitted to `update_workflow`. Absent fields are
/// left unchanged; the merged definition is re-validated.
///
/// The nullable workflow fields (`conditions`, `folder`, `exclusivity_key`)
/// use a double `Option` so that absent ("keep") and explicit `null`
/// ("clear") are distinct in the patch JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default, deserialize_with = "patch_field", skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Option<Condition>>,
    #[serde(default)]
    pub actions: Option<Vec<ActionStep>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "patch_field", skip_serializing_if = "Option::is_none")]
    pub folder: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field", skip_serializing_if = "Option::is_none")]
    pub exclusivity_key: Option<Option<String>>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
}

/// Deserialize a present field (including an explicit `null`) as
/// `Some(inner)`; absence falls back to the `None` default.
fn patch_field<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl WorkflowPatch {
    /// Merge this patch into `workflow` in place.
    pub fn apply(self, workflow: &mut Workflow) {
        if let Some(name) = self.name {
            workflow.name = name;
        }
        if let Some(status) = self.status {
            workflow.status = status;
        }
        if let Some(trigger) = self.trigger {
            workflow.trigger = trigger;
        }
        if let Some(conditions) = self.conditions {
            workflow.conditions = conditions;
        }
        if let Some(actions) = self.actions {
            workflow.actions = actions;
        }
        if let Some(tags) = self.tags {
            workflow.tags = tags;
        }
        if let Some(folder) = self.folder {
            workflow.folder = folder;
        }
        if let Some(key) = self.exclusivity_key {
            workflow.exclusivity_key = key;
        }
        if let Some(by) = self.last_modified_by {
            workflow.last_modified_by = Some(by);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// Lifecycle status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    Paused,
}

impl ExecutionStatus {
    /// Terminal states are retained for history and never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "cancelled" => Ok(Self::Cancelled),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A handler reported a non-retryable failure.
    Fatal,
    /// A retryable failure exhausted the retry budget.
    RetriesExhausted,
}

/// Structured failure detail, set only when the execution is `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub step: usize,
    pub kind: FailureKind,
    pub message: String,
}

/// One recorded retry of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub step: usize,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One run (or run-in-progress) of a workflow against a specific context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workspace_id: Uuid,
    pub status: ExecutionStatus,
    /// Earliest instant the execution is eligible to run.
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The original trigger payload. Immutable after creation.
    pub context: Value,
    /// `context` plus patches contributed by completed steps of this
    /// execution; what conditions and later steps actually see.
    pub working_context: Value,
    /// Value of the workflow's exclusivity key in `context`, materialised so
    /// the store can enforce at-most-one open execution per value.
    #[serde(default)]
    pub exclusivity_value: Option<Value>,
    /// Index into the owning workflow's action sequence; the next step to
    /// run. Enables resume-after-pause and crash recovery.
    pub current_step: usize,
    /// Retry counter for the current step; reset on success.
    pub attempts: u32,
    /// History of retry attempts across the whole execution.
    #[serde(default)]
    pub retries: Vec<RetryAttempt>,
    pub error: Option<ExecutionError>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowExecution {
    /// Create a fresh `pending` execution for `workflow`.
    pub fn new(
        workflow: &Workflow,
        context: Value,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            workspace_id: workflow.workspace_id,
            status: ExecutionStatus::Pending,
            scheduled_at,
            started_at: None,
            completed_at: None,
            working_context: context.clone(),
            exclusivity_value: workflow
                .exclusivity_key
                .as_ref()
                .and_then(|key| context.get(key).cloned()),
            context,
            current_step: 0,
            attempts: 0,
            retries: Vec::new(),
            error: None,
            skip_reason: None,
            created_at: now,
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow() -> Workflow {
        let def = WorkflowDefinition {
            name: "renewal reminder".into(),
            status: WorkflowStatus::Active,
            trigger: Trigger::Event { event_type: "deal.renewing".into(), event_filter: None },
            conditions: None,
            actions: vec![ActionStep::AddTag { tag: "renewal".into() }],
            tags: vec![],
            folder: Some("sales".into()),
            exclusivity_key: Some("deal_id".into()),
            created_by: None,
        };
        Workflow::from_definition(Uuid::new_v4(), def, Utc::now())
    }

    #[test]
    fn patch_leaves_absent_fields_untouched() {
        let mut wf = workflow();
        let patch: WorkflowPatch = serde_json::from_value(json!({ "name": "renamed" })).unwrap();
        patch.apply(&mut wf);

        assert_eq!(wf.name, "renamed");
        assert_eq!(wf.folder.as_deref(), Some("sales"));
        assert_eq!(wf.exclusivity_key.as_deref(), Some("deal_id"));
    }

    #[test]
    fn patch_null_clears_nullable_fields() {
        let mut wf = workflow();
        wf.conditions = Some(Condition::predicate(
            "status",
            crate::condition::Operator::Exists,
            Value::Null,
        ));

        let patch: WorkflowPatch = serde_json::from_value(json!({
            "folder": null,
            "exclusivity_key": null,
            "conditions": null,
        }))
        .unwrap();
        patch.apply(&mut wf);

        assert_eq!(wf.folder, None);
        assert_eq!(wf.exclusivity_key, None);
        assert!(wf.conditions.is_none());
    }

    #[test]
    fn patch_value_replaces_nullable_fields() {
        let mut wf = workflow();
        let patch: WorkflowPatch =
            serde_json::from_value(json!({ "folder": "archive" })).unwrap();
        patch.apply(&mut wf);
        assert_eq!(wf.folder.as_deref(), Some("archive"));
    }

    #[test]
    fn execution_materialises_the_exclusivity_value() {
        let wf = workflow();
        let exec = WorkflowExecution::new(
            &wf,
            json!({ "deal_id": "d-9", "amount": 1200 }),
            Utc::now(),
            Utc::now(),
        );
        assert_eq!(exec.exclusivity_value, Some(json!("d-9")));

        // No key declared, or key missing from the context: nothing to enforce.
        let mut plain = wf.clone();
        plain.exclusivity_key = None;
        let exec = WorkflowExecution::new(&plain, json!({ "deal_id": "d-9" }), Utc::now(), Utc::now());
        assert_eq!(exec.exclusivity_value, None);

        let exec = WorkflowExecution::new(&wf, json!({ "amount": 1200 }), Utc::now(), Utc::now());
        assert_eq!(exec.exclusivity_value, None);
    }
}
