//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;
use crate::validate::ValidationError;

/// Errors surfaced by the engine facade and the execution state machine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed workflow definition — rejected before persistence.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown workflow, or acting on an archived one.
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// Unknown execution.
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// Lost the claim race on an execution. The caller should treat this as
    /// "already being handled", not retry blindly.
    #[error("execution {0} is already claimed by another runner")]
    ConcurrencyConflict(Uuid),

    /// Persistence error from the workflow store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
