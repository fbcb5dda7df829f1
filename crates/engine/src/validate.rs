//! Definition validation — run this before persisting a workflow.
//!
//! Rules enforced:
//! 1. The name must be non-empty.
//! 2. A workflow outside `draft` must declare at least one action.
//! 3. `wait` steps must have a positive duration.
//! 4. `branch` targets must point past the branch itself (forward-only).
//! 5. A time trigger must be recurring or carry a future one-shot instant.
//! 6. Condition nodes (workflow gate, event filters, branch conditions)
//!    must be well-formed: `and`/`or` need at least one child, recurrence
//!    fields must be in range.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::condition::Condition;
use crate::models::{ActionStep, Trigger, Workflow, WorkflowStatus};
use crate::schedule::Recurrence;

/// Why a workflow definition was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("a non-draft workflow must declare at least one action")]
    EmptyActions,

    #[error("wait at step {0} must have a positive duration")]
    NonPositiveWait(usize),

    #[error("branch at step {step} targets step {target}, which is not ahead of it")]
    BranchTargetNotAhead { step: usize, target: usize },

    #[error("branch at step {step} targets step {target}, but the workflow has {len} steps")]
    BranchTargetOutOfRange { step: usize, target: usize, len: usize },

    #[error("time trigger must be recurring or scheduled at a future instant")]
    StaleTimeTrigger,

    #[error("'{node}' condition node must have at least one child")]
    EmptyConditionNode { node: &'static str },

    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),
}

/// Validate a workflow definition against the closed vocabulary.
///
/// `now` is injected so time-trigger freshness is deterministic in tests.
pub fn validate_definition(workflow: &Workflow, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if workflow.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if workflow.status != WorkflowStatus::Draft && workflow.actions.is_empty() {
        return Err(ValidationError::EmptyActions);
    }

    validate_trigger(&workflow.trigger, workflow.status, now)?;

    if let Some(conditions) = &workflow.conditions {
        validate_condition(conditions)?;
    }

    for (index, action) in workflow.actions.iter().enumerate() {
        match action {
            ActionStep::Wait { days, hours, minutes } => {
                if days * 24 * 60 + hours * 60 + minutes <= 0 {
                    return Err(ValidationError::NonPositiveWait(index));
                }
            }
            ActionStep::Branch { condition, to_step } => {
                validate_condition(condition)?;
                if let Some(target) = to_step {
                    if *target >= workflow.actions.len() {
                        return Err(ValidationError::BranchTargetOutOfRange {
                            step: index,
                            target: *target,
                            len: workflow.actions.len(),
                        });
                    }
                    if *target <= index {
                        return Err(ValidationError::BranchTargetNotAhead {
                            step: index,
                            target: *target,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn validate_trigger(
    trigger: &Trigger,
    status: WorkflowStatus,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    match trigger {
        Trigger::Event { event_filter, .. } => {
            if let Some(filter) = event_filter {
                validate_condition(filter)?;
            }
            Ok(())
        }
        Trigger::Time { schedule } => {
            if let Some(recurrence) = &schedule.recurrence {
                validate_recurrence(recurrence)?;
            }
            // Drafts may hold stale schedules; anything runnable must still
            // resolve to at least one future instant or be recurring.
            if status != WorkflowStatus::Draft
                && schedule.recurrence.is_none()
                && !schedule.scheduled_at.is_some_and(|at| at > now)
            {
                return Err(ValidationError::StaleTimeTrigger);
            }
            Ok(())
        }
    }
}

fn validate_recurrence(recurrence: &Recurrence) -> Result<(), ValidationError> {
    match recurrence {
        Recurrence::Weekly { weekday, .. } if *weekday > 6 => Err(
            ValidationError::InvalidRecurrence(format!("weekday {weekday} is out of range (0-6)")),
        ),
        Recurrence::Monthly { day, .. } if *day == 0 || *day > 31 => Err(
            ValidationError::InvalidRecurrence(format!("day {day} is out of range (1-31)")),
        ),
        Recurrence::Interval { minutes } if *minutes <= 0 => Err(
            ValidationError::InvalidRecurrence("interval must be at least one minute".into()),
        ),
        _ => Ok(()),
    }
}

fn validate_condition(condition: &Condition) -> Result<(), ValidationError> {
    match condition {
        Condition::And { all } => {
            if all.is_empty() {
                return Err(ValidationError::EmptyConditionNode { node: "and" });
            }
            all.iter().try_for_each(validate_condition)
        }
        Condition::Or { any } => {
            if any.is_empty() {
                return Err(ValidationError::EmptyConditionNode { node: "or" });
            }
            any.iter().try_for_each(validate_condition)
        }
        Condition::Not { not } => validate_condition(not),
        Condition::Predicate { .. } => Ok(()),
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Operator;
    use crate::models::WorkflowDefinition;
    use crate::schedule::Schedule;
    use chrono::{Duration, NaiveTime};
    use serde_json::json;
    use uuid::Uuid;

    fn workflow(status: WorkflowStatus, actions: Vec<ActionStep>) -> Workflow {
        let def = WorkflowDefinition {
            name: "welcome sequence".into(),
            status,
            trigger: Trigger::Event { event_type: "lead.created".into(), event_filter: None },
            conditions: None,
            actions,
            tags: vec![],
            folder: None,
            exclusivity_key: None,
            created_by: None,
        };
        Workflow::from_definition(Uuid::new_v4(), def, Utc::now())
    }

    fn email() -> ActionStep {
        ActionStep::SendEmail { template: "welcome".into(), subject: None }
    }

    #[test]
    fn draft_may_have_no_actions() {
        let wf = workflow(WorkflowStatus::Draft, vec![]);
        assert!(validate_definition(&wf, Utc::now()).is_ok());
    }

    #[test]
    fn active_workflow_requires_actions() {
        let wf = workflow(WorkflowStatus::Active, vec![]);
        assert_eq!(
            validate_definition(&wf, Utc::now()),
            Err(ValidationError::EmptyActions)
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut wf = workflow(WorkflowStatus::Draft, vec![]);
        wf.name = "  ".into();
        assert_eq!(validate_definition(&wf, Utc::now()), Err(ValidationError::EmptyName));
    }

    #[test]
    fn zero_duration_wait_is_rejected() {
        let wf = workflow(
            WorkflowStatus::Active,
            vec![email(), ActionStep::Wait { days: 0, hours: 0, minutes: 0 }],
        );
        assert_eq!(
            validate_definition(&wf, Utc::now()),
            Err(ValidationError::NonPositiveWait(1))
        );
    }

    #[test]
    fn branch_must_jump_forward_and_in_range() {
        let branch_back = ActionStep::Branch {
            condition: Condition::predicate("status", Operator::Exists, json!(null)),
            to_step: Some(0),
        };
        let wf = workflow(WorkflowStatus::Active, vec![email(), branch_back, email()]);
        assert!(matches!(
            validate_definition(&wf, Utc::now()),
            Err(ValidationError::BranchTargetNotAhead { step: 1, target: 0 })
        ));

        let branch_out = ActionStep::Branch {
            condition: Condition::predicate("status", Operator::Exists, json!(null)),
            to_step: Some(9),
        };
        let wf = workflow(WorkflowStatus::Active, vec![email(), branch_out]);
        assert!(matches!(
            validate_definition(&wf, Utc::now()),
            Err(ValidationError::BranchTargetOutOfRange { .. })
        ));
    }

    #[test]
    fn active_time_trigger_needs_a_future_instant_or_recurrence() {
        let now = Utc::now();
        let mut wf = workflow(WorkflowStatus::Active, vec![email()]);

        wf.trigger = Trigger::Time {
            schedule: Schedule { recurrence: None, scheduled_at: Some(now - Duration::hours(1)) },
        };
        assert_eq!(validate_definition(&wf, now), Err(ValidationError::StaleTimeTrigger));

        wf.trigger = Trigger::Time {
            schedule: Schedule { recurrence: None, scheduled_at: Some(now + Duration::hours(1)) },
        };
        assert!(validate_definition(&wf, now).is_ok());

        wf.trigger = Trigger::Time {
            schedule: Schedule {
                recurrence: Some(Recurrence::Daily {
                    at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                }),
                scheduled_at: None,
            },
        };
        assert!(validate_definition(&wf, now).is_ok());
    }

    #[test]
    fn empty_and_node_is_rejected() {
        let mut wf = workflow(WorkflowStatus::Draft, vec![]);
        wf.conditions = Some(Condition::And { all: vec![] });
        assert_eq!(
            validate_definition(&wf, Utc::now()),
            Err(ValidationError::EmptyConditionNode { node: "and" })
        );
    }

    #[test]
    fn out_of_range_recurrence_is_rejected() {
        let mut wf = workflow(WorkflowStatus::Active, vec![email()]);
        wf.trigger = Trigger::Time {
            schedule: Schedule {
                recurrence: Some(Recurrence::Weekly {
                    weekday: 7,
                    at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                }),
                scheduled_at: None,
            },
        };
        assert!(matches!(
            validate_definition(&wf, Utc::now()),
            Err(ValidationError::InvalidRecurrence(_))
        ));
    }

    #[test]
    fn unknown_action_kind_fails_deserialisation() {
        // The vocabulary is closed at the type level: an unknown kind never
        // reaches validation.
        let raw = json!({ "kind": "launch_rocket", "fuel": "lots" });
        assert!(serde_json::from_value::<ActionStep>(raw).is_err());
    }
}
