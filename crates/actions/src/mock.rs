//! `MockHandler` — a test double for `ActionHandler`.
//!
//! Useful in unit and integration tests where a real side-effecting handler
//! is either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome};

/// Behaviour injected into `MockHandler` at construction time.
pub enum MockBehaviour {
    /// Succeed, optionally contributing a context patch.
    Succeed(Option<Value>),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail `Retryable` for the first `failures` calls, then succeed.
    SucceedAfter { failures: u32, reason: String },
}

/// A mock handler that records every call it receives and returns a
/// programmer-specified outcome.
pub struct MockHandler {
    /// Label used in test assertions.
    pub name: String,
    /// What the handler will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All parameter payloads seen by this handler (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    attempts: AtomicU32,
}

impl MockHandler {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicU32::new(0),
        })
    }

    /// Create a mock that always succeeds with no context patch.
    pub fn succeeding(name: impl Into<String>) -> Arc<Self> {
        Self::with_behaviour(name, MockBehaviour::Succeed(None))
    }

    /// Create a mock that always succeeds and patches the working context.
    pub fn patching(name: impl Into<String>, patch: Value) -> Arc<Self> {
        Self::with_behaviour(name, MockBehaviour::Succeed(Some(patch)))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Arc<Self> {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Arc<Self> {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `Retryable` `failures` times, then succeeds.
    pub fn flaky(name: impl Into<String>, failures: u32) -> Arc<Self> {
        Self::with_behaviour(
            name,
            MockBehaviour::SucceedAfter { failures, reason: "transient failure".into() },
        )
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionHandler for MockHandler {
    async fn execute(
        &self,
        params: Value,
        _ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        self.calls.lock().unwrap().push(params);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        match &self.behaviour {
            MockBehaviour::Succeed(patch) => Ok(ActionOutcome::Success { patch: patch.clone() }),
            MockBehaviour::FailRetryable(msg) => Err(ActionError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ActionError::Fatal(msg.clone())),
            MockBehaviour::SucceedAfter { failures, reason } => {
                if attempt < *failures {
                    Err(ActionError::Retryable(reason.clone()))
                } else {
                    Ok(ActionOutcome::done())
                }
            }
        }
    }
}
