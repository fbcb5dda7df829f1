//! Handler-level error type.

use thiserror::Error;

/// Errors returned by a handler's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — the execution is re-queued with exponential back-off.
/// - `Fatal`     — the execution is immediately marked as failed.
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// Transient failure; the engine should re-try the step.
    #[error("retryable action error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal action error: {0}")]
    Fatal(String),
}
