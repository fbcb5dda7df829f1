//! Execution, event and scheduler handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use engine::{TickSummary, WorkflowExecution, WorkflowFilter};

use super::{status_for, AppState};

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub context: Value,
}

pub async fn execute(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<WorkflowExecution>, StatusCode> {
    let context = match request.context {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let execution = state
        .engine
        .execute_workflow(workspace_id, id, context)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(execution))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub workflow_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<WorkflowExecution>>, StatusCode> {
    let executions = state
        .engine
        .get_executions(
            workspace_id,
            query.workflow_id,
            query.limit.unwrap_or(WorkflowFilter::DEFAULT_LIMIT),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(executions))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<WorkflowExecution>, StatusCode> {
    let execution = state
        .engine
        .get_execution(workspace_id, id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(execution))
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Fan an event out to every matching event-triggered workflow. The enqueued
/// executions run on the next scheduler tick.
pub async fn publish_event(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Json(request): Json<EventRequest>,
) -> Result<(StatusCode, Json<Vec<WorkflowExecution>>), StatusCode> {
    let payload = match request.payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let enqueued = state
        .engine
        .enqueue_event(workspace_id, &request.event_type, payload)
        .await
        .map_err(|e| status_for(&e))?;

    Ok((StatusCode::ACCEPTED, Json(enqueued)))
}

pub async fn tick(
    State(state): State<AppState>,
) -> Result<Json<TickSummary>, StatusCode> {
    let summary = state
        .engine
        .run_tick(Utc::now())
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(summary))
}
