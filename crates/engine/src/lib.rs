//! `engine` crate — core domain models, definition validation, the execution
//! state machine, the trigger scheduler, and the engine facade.

pub mod condition;
pub mod error;
pub mod facade;
pub mod models;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod validate;

pub use condition::{Condition, Operator};
pub use error::EngineError;
pub use facade::{EngineConfig, WorkflowEngine};
pub use models::{
    ActionStep, ExecutionStatus, Trigger, Workflow, WorkflowDefinition, WorkflowExecution,
    WorkflowPatch, WorkflowStatus,
};
pub use runner::{ExecutionRunner, RunOutcome, RunnerConfig};
pub use schedule::{Recurrence, Schedule};
pub use scheduler::{SchedulerConfig, TickSummary, TriggerScheduler};
pub use store::{MemoryStore, StoreError, WorkflowFilter, WorkflowPage, WorkflowStore};
pub use validate::{validate_definition, ValidationError};
