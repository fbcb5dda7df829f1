//! The `ActionHandler` trait — the contract every action handler must fulfil.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ActionError;

/// Shared context passed to every handler during execution.
///
/// Defined here (in the actions crate) so both the engine and individual
/// handler implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// Workspace the workflow belongs to.
    pub workspace_id: uuid::Uuid,
    /// Injectable wall clock; handlers never call `Utc::now()` themselves.
    pub now: DateTime<Utc>,
    /// Working copy of the execution context: the original trigger payload
    /// plus any patches contributed by earlier steps of the same execution.
    pub context: Value,
}

/// What a handler reports back to the engine on success.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The side effect completed. An optional `patch` object is merged into
    /// the execution's working context, visible to subsequent steps only —
    /// the original trigger payload is never mutated.
    Success { patch: Option<Value> },

    /// The execution should stop here and be re-dispatched at `resume_at`
    /// (used by the `wait` kind). No side effect was performed.
    Suspend { resume_at: DateTime<Utc> },
}

impl ActionOutcome {
    /// Plain success with no context patch.
    pub fn done() -> Self {
        Self::Success { patch: None }
    }
}

/// The core handler trait.
///
/// One handler is registered per action `kind`; the engine passes the step's
/// parameters (the variant's fields, serialised) and the working context.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError>;
}
