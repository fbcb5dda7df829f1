//! Built-in `wait` handler.
//!
//! `wait` performs no side effect: it computes the instant the execution
//! should resume and reports [`ActionOutcome::Suspend`]. The engine persists
//! the execution back to `pending` with `scheduled_at` set to that instant,
//! which is how multi-day sequences run without holding a live process.

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome};

/// Parameters for a `wait` step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaitParams {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
}

impl WaitParams {
    pub fn as_duration(&self) -> Duration {
        Duration::days(self.days) + Duration::hours(self.hours) + Duration::minutes(self.minutes)
    }
}

/// Handler for the `wait` action kind.
pub struct WaitHandler;

#[async_trait]
impl ActionHandler for WaitHandler {
    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let params: WaitParams = serde_json::from_value(params)
            .map_err(|e| ActionError::Fatal(format!("invalid wait parameters: {e}")))?;

        let duration = params.as_duration();
        if duration <= Duration::zero() {
            return Err(ActionError::Fatal("wait duration must be positive".into()));
        }

        Ok(ActionOutcome::Suspend {
            resume_at: ctx.now + duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> ActionContext {
        ActionContext {
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            now: Utc::now(),
            context: json!({}),
        }
    }

    #[tokio::test]
    async fn wait_suspends_until_now_plus_duration() {
        let ctx = ctx();
        let outcome = WaitHandler
            .execute(json!({ "days": 2 }), &ctx)
            .await
            .expect("wait should succeed");

        assert_eq!(
            outcome,
            ActionOutcome::Suspend { resume_at: ctx.now + Duration::days(2) }
        );
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let result = WaitHandler.execute(json!({}), &ctx()).await;
        assert!(matches!(result, Err(ActionError::Fatal(_))));
    }

    #[tokio::test]
    async fn mixed_units_are_summed() {
        let ctx = ctx();
        let outcome = WaitHandler
            .execute(json!({ "hours": 1, "minutes": 30 }), &ctx)
            .await
            .unwrap();

        let expected = ctx.now + Duration::minutes(90);
        assert!(matches!(outcome, ActionOutcome::Suspend { resume_at } if resume_at == expected));
    }
}
