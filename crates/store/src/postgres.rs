//! Postgres-backed `WorkflowStore`.
//!
//! Workflow definitions are stored as a JSONB `definition` column alongside
//! the scalar columns the queries filter on; executions map column-per-field.
//! The claim operation is a conditional `UPDATE … WHERE status IN
//! ('pending','paused')`, which is the store-level compare-and-set the
//! engine's concurrency model relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use engine::store::{StoreError, WorkflowFilter, WorkflowPage, WorkflowStore};
use engine::{ExecutionStatus, Workflow, WorkflowExecution};

/// PostgreSQL-backed workflow store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Backend(other.into()),
    }
}

fn workflow_from_row(row: &PgRow) -> Result<Workflow, StoreError> {
    let definition: Value = row.try_get("definition").map_err(backend)?;
    Ok(serde_json::from_value(definition)?)
}

const EXEC_COLUMNS: &str = "id, workflow_id, workspace_id, status, scheduled_at, started_at, \
     completed_at, context, working_context, exclusivity_value, current_step, attempts, \
     retries, error, skip_reason, created_at";

fn execution_from_row(row: &PgRow) -> Result<WorkflowExecution, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let status: ExecutionStatus = status
        .parse()
        .map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?;

    let current_step: i64 = row.try_get("current_step").map_err(backend)?;
    let attempts: i32 = row.try_get("attempts").map_err(backend)?;
    let retries: Value = row.try_get("retries").map_err(backend)?;
    let error: Option<Value> = row.try_get("error").map_err(backend)?;

    Ok(WorkflowExecution {
        id: row.try_get("id").map_err(backend)?,
        workflow_id: row.try_get("workflow_id").map_err(backend)?,
        workspace_id: row.try_get("workspace_id").map_err(backend)?,
        status,
        scheduled_at: row.try_get("scheduled_at").map_err(backend)?,
        started_at: row.try_get("started_at").map_err(backend)?,
        completed_at: row.try_get("completed_at").map_err(backend)?,
        context: row.try_get("context").map_err(backend)?,
        working_context: row.try_get("working_context").map_err(backend)?,
        exclusivity_value: row.try_get("exclusivity_value").map_err(backend)?,
        current_step: current_step as usize,
        attempts: attempts as u32,
        retries: serde_json::from_value(retries)?,
        error: error.map(serde_json::from_value).transpose()?,
        skip_reason: row.try_get("skip_reason").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

/// Tags filter as a JSONB containment argument; `None` disables the filter.
fn tags_param(filter: &WorkflowFilter) -> Option<Value> {
    if filter.tags.is_empty() {
        None
    } else {
        Some(Value::from(filter.tags.clone()))
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let definition = serde_json::to_value(workflow)?;
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, workspace_id, name, status, folder, tags, definition,
                 last_executed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.workspace_id)
        .bind(&workflow.name)
        .bind(workflow.status.to_string())
        .bind(&workflow.folder)
        .bind(Value::from(workflow.tags.clone()))
        .bind(definition)
        .bind(workflow.last_executed_at)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let definition = serde_json::to_value(workflow)?;
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, status = $3, folder = $4, tags = $5, definition = $6,
                last_executed_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(workflow.status.to_string())
        .bind(&workflow.folder)
        .bind(Value::from(workflow.tags.clone()))
        .bind(definition)
        .bind(workflow.last_executed_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_workflow(&self, workspace_id: Uuid, id: Uuid) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"SELECT definition FROM workflows WHERE id = $1 AND workspace_id = $2"#,
        )
        .bind(id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;

        workflow_from_row(&row)
    }

    async fn list_workflows(
        &self,
        workspace_id: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<WorkflowPage, StoreError> {
        let status = filter.status.map(|s| s.to_string());
        let tags = tags_param(filter);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM workflows
            WHERE workspace_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR folder = $3)
              AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%')
              AND ($5::jsonb IS NULL OR tags @> $5)
            "#,
        )
        .bind(workspace_id)
        .bind(&status)
        .bind(&filter.folder)
        .bind(&filter.search)
        .bind(&tags)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let rows = sqlx::query(
            r#"
            SELECT definition FROM workflows
            WHERE workspace_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR folder = $3)
              AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%')
              AND ($5::jsonb IS NULL OR tags @> $5)
            ORDER BY updated_at DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(workspace_id)
        .bind(&status)
        .bind(&filter.folder)
        .bind(&filter.search)
        .bind(&tags)
        .bind(filter.limit() as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let workflows = rows
            .iter()
            .map(workflow_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WorkflowPage { workflows, total: total as usize })
    }

    async fn active_time_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM workflows
            WHERE status = 'active' AND definition->'trigger'->>'type' = 'time'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(workflow_from_row).collect()
    }

    async fn active_event_workflows(
        &self,
        workspace_id: Uuid,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM workflows
            WHERE workspace_id = $1
              AND status = 'active'
              AND definition->'trigger'->>'type' = 'event'
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(workflow_from_row).collect()
    }

    async fn set_last_executed(
        &self,
        workflow_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Keep the scalar column and the JSONB definition in agreement.
        sqlx::query(
            r#"
            UPDATE workflows
            SET last_executed_at = $2,
                definition = jsonb_set(definition, '{last_executed_at}', to_jsonb($2::timestamptz))
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, workspace_id, status, scheduled_at, started_at,
                 completed_at, context, working_context, exclusivity_value,
                 current_step, attempts, retries, error, skip_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.workspace_id)
        .bind(execution.status.to_string())
        .bind(execution.scheduled_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.context)
        .bind(&execution.working_context)
        .bind(&execution.exclusivity_value)
        .bind(execution.current_step as i64)
        .bind(execution.attempts as i32)
        .bind(serde_json::to_value(&execution.retries)?)
        .bind(execution.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&execution.skip_reason)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            // The partial unique index on open executions rejected the row.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateExecution
            }
            _ => backend(e),
        })?;
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, scheduled_at = $3, started_at = $4, completed_at = $5,
                working_context = $6, current_step = $7, attempts = $8, retries = $9,
                error = $10, skip_reason = $11
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.to_string())
        .bind(execution.scheduled_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.working_context)
        .bind(execution.current_step as i64)
        .bind(execution.attempts as i32)
        .bind(serde_json::to_value(&execution.retries)?)
        .bind(execution.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&execution.skip_reason)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowExecution, StoreError> {
        let query = format!(
            "SELECT {EXEC_COLUMNS} FROM workflow_executions WHERE id = $1 AND workspace_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound)?;

        execution_from_row(&row)
    }

    async fn list_executions(
        &self,
        workspace_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let query = format!(
            r#"
            SELECT {EXEC_COLUMNS} FROM workflow_executions
            WHERE workspace_id = $1 AND ($2::uuid IS NULL OR workflow_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows = sqlx::query(&query)
            .bind(workspace_id)
            .bind(workflow_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn claim_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        let query = format!(
            r#"
            UPDATE workflow_executions
            SET status = 'running'
            WHERE id = $1 AND status IN ('pending', 'paused')
            RETURNING {EXEC_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => execution_from_row(&row),
            None => {
                // Distinguish "doesn't exist" from "lost the race".
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM workflow_executions WHERE id = $1)",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;

                if exists {
                    Err(StoreError::ClaimConflict)
                } else {
                    Err(StoreError::NotFound)
                }
            }
        }
    }

    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let query = format!(
            r#"
            SELECT {EXEC_COLUMNS} FROM workflow_executions
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn resumable_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let query = format!(
            r#"
            SELECT {EXEC_COLUMNS} FROM workflow_executions e
            WHERE e.status = 'paused'
              AND EXISTS (
                  SELECT 1 FROM workflows w
                  WHERE w.id = e.workflow_id AND w.status = 'active'
              )
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn cancel_open_executions(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'cancelled', completed_at = COALESCE(completed_at, $2)
            WHERE workflow_id = $1 AND status IN ('pending', 'paused')
            "#,
        )
        .bind(workflow_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected())
    }

    async fn latest_execution_at(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM workflow_executions WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(latest)
    }
}
