//! Processor module
//!
//! Provides the Handler trait and the registry mapping task types to handlers.

pub mod context;

pub use context::HandlerContext;

use crate::task::Task;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Handler trait - Task processor
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle task
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Result<()>;
}

/// Handler built from an async closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`]
///
/// # Example
///
/// ```rust
/// use fairq::processor::{handler_fn, Registry};
///
/// let mut registry = Registry::new();
/// registry.register("campaign", handler_fn(|_ctx, task| async move {
///     tracing::info!("starting campaign for tenant {}", task.tenant_id);
///     Ok(())
/// }));
/// assert!(registry.contains("campaign"));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(HandlerContext, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(HandlerContext, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, ctx: &HandlerContext, task: &Task) -> Result<()> {
        (self.f)(ctx.clone(), task.clone()).await
    }
}

/// Handler registry
///
/// Built once at startup, then shared read-only with every Foreman.
#[derive(Default, Clone)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("Registry").field("task_types", &types).finish()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a task type, replacing any previous one
    pub fn register<H: Handler + 'static>(&mut self, task_type: &str, handler: H) {
        if self
            .handlers
            .insert(task_type.to_string(), Arc::new(handler))
            .is_some()
        {
            tracing::warn!("Handler for task type {} replaced", task_type);
        }
    }

    /// Look up the handler for a task type
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Check if a handler is registered for the task type
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Number of registered task types
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
