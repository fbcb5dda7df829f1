//! `actions` crate — the `ActionHandler` trait and the handler registry.
//!
//! Every side-effecting action kind (send-email, update-record, …) is backed
//! by a handler implementing [`ActionHandler`]. The engine crate dispatches
//! steps through this trait object; concrete handlers for email, CRM and
//! notification side effects are supplied by those subsystems and registered
//! at startup.

pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;
pub mod wait;

pub use error::ActionError;
pub use registry::HandlerRegistry;
pub use traits::{ActionContext, ActionHandler, ActionOutcome};
pub use wait::WaitHandler;
