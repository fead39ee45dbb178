//! Handler context module
//!
//! Provides context information to task handlers, including access to the
//! queue engine for the durable processing path and the shutdown state.

use crate::queue::TaskQueue;
use crate::task::{Fingerprint, Task};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Context provided to task handlers during execution
///
/// HandlerContext provides handlers with access to:
/// - The queue and worker the task is running on
/// - The queue engine, for opting into durable processing
/// - Shutdown state
///
/// # Example
///
/// ```rust
/// use fairq::processor::{Handler, HandlerContext};
/// use fairq::Task;
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct SendBroadcast;
///
/// #[async_trait]
/// impl Handler for SendBroadcast {
///     async fn handle(&self, ctx: &HandlerContext, task: &Task) -> fairq::Result<()> {
///         // redelivered by the sweeper if we die before the end
///         let fingerprint = ctx.begin_processing(task, Duration::from_secs(300)).await?;
///
///         // ... slow work ...
///
///         ctx.end_processing(task, &fingerprint).await
///     }
/// }
/// ```
#[derive(Clone)]
pub struct HandlerContext {
    /// Queue the task was popped from
    queue_name: Arc<str>,

    /// Worker executing the task
    worker_id: Arc<str>,

    /// Queue engine
    queue: TaskQueue,

    /// Set once the owning Foreman is stopping
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("queue_name", &self.queue_name)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl HandlerContext {
    /// Create a new handler context
    pub fn new(
        queue_name: Arc<str>,
        worker_id: Arc<str>,
        queue: TaskQueue,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue_name,
            worker_id,
            queue,
            shutdown,
        }
    }

    /// Create a context that is not attached to any Foreman
    ///
    /// Useful for invoking handlers directly, e.g. in tests.
    pub fn detached(queue_name: &str, queue: TaskQueue) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(Arc::from(queue_name), Arc::from("detached"), queue, rx)
    }

    /// Get the queue name the task was popped from
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Get the worker ID executing the task
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Get the queue engine
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Check if the owning Foreman is shutting down
    ///
    /// Long-running handlers may check this and wrap up early. Nothing forces
    /// them to: a handler always runs to completion.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Register durable intent for `task` with a redelivery deadline of `ttl`
    pub async fn begin_processing(&self, task: &Task, ttl: Duration) -> Result<Fingerprint> {
        self.queue
            .begin_processing(&self.queue_name, task.tenant_id, task, ttl)
            .await
    }

    /// Clear durable intent registered with [`HandlerContext::begin_processing`]
    pub async fn end_processing(&self, task: &Task, fingerprint: &Fingerprint) -> Result<()> {
        self.queue
            .end_processing(&self.queue_name, task.tenant_id, fingerprint)
            .await
    }
}
