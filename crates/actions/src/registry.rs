//! Maps action `kind` strings to registered [`ActionHandler`] implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ActionHandler;

/// The handler registry built at startup.
///
/// The engine resolves each step's `kind` against this registry at dispatch
/// time; an unregistered kind is a fatal dispatch error (the vocabulary is
/// validated at workflow-save time, so this only happens when a collaborator
/// forgot to register its handler).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given kind, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Builder-style variant of [`HandlerRegistry::register`].
    pub fn with(mut self, kind: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
