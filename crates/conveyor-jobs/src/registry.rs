//! Closed handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::JobHandler;

/// Mapping from job type string to its handler.
///
/// Assembled by the engine builder before the worker pool starts and frozen
/// afterwards: dispatch is a plain `HashMap` lookup with no lock, and
/// unknown types are rejected at submission time rather than at dispatch.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own `job_type()` key.
    ///
    /// Registering a second handler for the same type replaces the first;
    /// only one handler per type is ever consulted.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type().to_string(), handler);
    }

    /// Look up the handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Whether a handler is registered for `job_type`.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job type strings, unordered.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
