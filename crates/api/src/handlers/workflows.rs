//! Workflow CRUD handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use engine::{Workflow, WorkflowDefinition, WorkflowFilter, WorkflowPatch};

use super::{status_for, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    /// Comma-separated; workflows must carry every listed tag.
    pub tags: Option<String>,
    pub folder: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowList {
    pub workflows: Vec<Workflow>,
    pub total: usize,
}

impl ListQuery {
    fn into_filter(self) -> Result<WorkflowFilter, StatusCode> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(raw.parse().map_err(|_| StatusCode::BAD_REQUEST)?),
            None => None,
        };
        let tags = self
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(WorkflowFilter {
            status,
            tags,
            folder: self.folder,
            search: self.search,
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<WorkflowList>, StatusCode> {
    let filter = query.into_filter()?;
    let page = state
        .engine
        .get_workflows(workspace_id, &filter)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(WorkflowList { workflows: page.workflows, total: page.total }))
}

pub async fn create(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<Workflow>), StatusCode> {
    let workflow = state
        .engine
        .create_workflow(workspace_id, definition)
        .await
        .map_err(|e| status_for(&e))?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Workflow>, StatusCode> {
    let workflow = state
        .engine
        .get_workflow(workspace_id, id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(workflow))
}

pub async fn update(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<WorkflowPatch>,
) -> Result<Json<Workflow>, StatusCode> {
    let workflow = state
        .engine
        .update_workflow(workspace_id, id, patch)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(Json(workflow))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .delete_workflow(workspace_id, id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .pause_workflow(workspace_id, id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .resume_workflow(workspace_id, id)
        .await
        .map_err(|e| status_for(&e))?;

    Ok(StatusCode::NO_CONTENT)
}
