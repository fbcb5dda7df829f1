//! Request handlers and shared state.

pub mod executions;
pub mod workflows;

use std::sync::Arc;

use axum::http::StatusCode;
use engine::{EngineError, WorkflowEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

/// Map engine errors onto HTTP statuses.
pub fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
