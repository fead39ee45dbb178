//! Worker implementation
//!
//! A worker executes one task at a time. It announces itself on the
//! Foreman's idle channel, waits for a job on its own single-slot channel,
//! runs the registered handler and always releases the tenant's fairness
//! slot afterwards.
//!
//! Handlers are polled inside a panic boundary. A process-wide panic hook,
//! installed the first time a worker runs a handler, captures the backtrace
//! of panics raised while a handler is being polled; the worker logs it
//! through `tracing` together with the panic message. Panics anywhere else
//! still go to the previously installed hook.

use crate::observability::FairqMetrics;
use crate::processor::{HandlerContext, Registry};
use crate::queue::TaskQueue;
use crate::task::{Task, TenantId};
use crate::Error;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Counters shared by every worker of one Foreman
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub(crate) busy: AtomicUsize,
    pub(crate) handled: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) unhandled: AtomicU64,
    pub(crate) slow: AtomicU64,
}

/// Everything a worker needs that is the same for the whole pool
pub(crate) struct WorkerShared {
    pub(crate) queue_name: Arc<str>,
    pub(crate) queue: TaskQueue,
    pub(crate) registry: Arc<Registry>,
    pub(crate) metrics: Option<Arc<FairqMetrics>>,
    pub(crate) counters: Arc<WorkerCounters>,
    pub(crate) pool_size: usize,
    pub(crate) slow_task_threshold: Duration,
}

impl WorkerShared {
    pub(crate) fn report_occupancy(&self) {
        if let Some(metrics) = &self.metrics {
            let busy = self.counters.busy.load(Ordering::Relaxed);
            metrics.set_workers(&self.queue_name, self.pool_size.saturating_sub(busy), busy);
        }
    }
}

/// How a single task execution ended
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    /// Handler returned Ok
    Succeeded,
    /// Handler returned an error
    Failed(Error),
    /// Handler panicked
    Panicked(HandlerPanic),
    /// No handler registered for the task type
    Unhandled,
}

impl TaskOutcome {
    fn reason(&self) -> Option<&'static str> {
        match self {
            TaskOutcome::Succeeded => None,
            TaskOutcome::Failed(_) => Some("error"),
            TaskOutcome::Panicked(_) => Some("panic"),
            TaskOutcome::Unhandled => Some("unhandled"),
        }
    }
}

/// Releases a tenant's fairness slot exactly once
///
/// [`SlotGuard::release`] is the normal path. If the guard is dropped
/// without it (the worker future was cancelled mid-task), the release is
/// spawned onto the runtime instead.
struct SlotGuard {
    slot: Option<(TaskQueue, Arc<str>, TenantId)>,
}

impl SlotGuard {
    fn new(queue: TaskQueue, queue_name: Arc<str>, tenant_id: TenantId) -> Self {
        Self {
            slot: Some((queue, queue_name, tenant_id)),
        }
    }

    async fn release(mut self) {
        if let Some((queue, queue_name, tenant_id)) = self.slot.take() {
            release_slot(queue, queue_name, tenant_id).await;
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some((queue, queue_name, tenant_id)) = self.slot.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(release_slot(queue, queue_name, tenant_id));
                }
                Err(_) => {
                    tracing::error!(
                        "Slot for tenant {} on {} leaked: no runtime to release it",
                        tenant_id,
                        queue_name
                    );
                }
            }
        }
    }
}

async fn release_slot(queue: TaskQueue, queue_name: Arc<str>, tenant_id: TenantId) {
    if let Err(e) = queue.mark_task_complete(&queue_name, tenant_id).await {
        tracing::error!(
            "Failed to release slot for tenant {} on {}: {}",
            tenant_id,
            queue_name,
            e
        );
    }
}

/// A panic caught at the handler boundary
#[derive(Debug)]
pub(crate) struct HandlerPanic {
    pub(crate) message: String,
    /// Captured at the panic site; absent if the hook was bypassed
    pub(crate) backtrace: Option<Backtrace>,
}

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_HANDLER.with(Cell::get) {
                let backtrace = Backtrace::force_capture();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Polls a handler future, turning a panic into [`HandlerPanic`]
struct CatchPanic<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> CatchPanic<F> {
    fn new(inner: F) -> Self {
        install_panic_hook();
        Self { inner: Box::pin(inner) }
    }
}

impl<F: Future> Future for CatchPanic<F> {
    type Output = std::result::Result<F::Output, HandlerPanic>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        let outer = IN_HANDLER.with(|flag| flag.replace(true));
        let polled = panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx)));
        IN_HANDLER.with(|flag| flag.set(outer));

        match polled {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(HandlerPanic {
                message: panic_message(payload),
                backtrace: LAST_BACKTRACE.with(|slot| slot.borrow_mut().take()),
            })),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resolves once the stop flag is set, or the Foreman is gone
///
/// The `watch::Ref` from `wait_for` is dropped here so callers keep no
/// borrow of the receiver.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Worker - task execution unit
pub(crate) struct Worker {
    /// Position in the pool, sent on the idle channel
    index: usize,

    /// Unique worker ID
    id: Arc<str>,

    shared: Arc<WorkerShared>,

    /// Idle announcements to the assignment loop
    idle_tx: mpsc::Sender<usize>,

    /// Single-slot job channel fed by the assignment loop
    jobs: mpsc::Receiver<Task>,

    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        shared: Arc<WorkerShared>,
        idle_tx: mpsc::Sender<usize>,
        jobs: mpsc::Receiver<Task>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let id: Arc<str> = Arc::from(format!("{}-worker-{}", shared.queue_name, index));
        Self {
            index,
            id,
            shared,
            idle_tx,
            jobs,
            shutdown,
        }
    }

    /// Run the worker until the Foreman stops
    ///
    /// After the stop signal the worker no longer announces itself idle, but
    /// it still executes whatever the assignment loop handed it before that
    /// loop hung up.
    pub(crate) async fn run(mut self) {
        tracing::info!("Worker {} starting", self.id);

        loop {
            if self.idle_tx.send(self.index).await.is_err() {
                break;
            }

            tokio::select! {
                biased;

                job = self.jobs.recv() => match job {
                    Some(task) => {
                        self.execute(task).await;
                    }
                    None => break,
                },
                _ = stopped(&mut self.shutdown) => break,
            }
        }

        while let Some(task) = self.jobs.recv().await {
            self.execute(task).await;
        }

        tracing::info!("Worker {} stopped", self.id);
    }

    /// Execute one task and release its slot
    pub(crate) async fn execute(&self, task: Task) -> TaskOutcome {
        let shared = &self.shared;
        shared.counters.busy.fetch_add(1, Ordering::Relaxed);
        shared.report_occupancy();

        let started = Instant::now();
        let guard = SlotGuard::new(shared.queue.clone(), shared.queue_name.clone(), task.tenant_id);
        let outcome = self.invoke(&task).await;
        guard.release().await;
        let elapsed = started.elapsed();

        match &outcome {
            TaskOutcome::Succeeded => {
                tracing::debug!("Worker {} handled {} in {:?}", self.id, task.description(), elapsed);
                shared.counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Failed(e) => {
                tracing::error!("Worker {}: {} failed: {}", self.id, task.description(), e);
                shared.counters.handled.fetch_add(1, Ordering::Relaxed);
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Panicked(panic) => {
                match &panic.backtrace {
                    Some(backtrace) => tracing::error!(
                        "Worker {}: {} panicked: {}\n{}",
                        self.id,
                        task.description(),
                        panic.message,
                        backtrace
                    ),
                    None => tracing::error!("Worker {}: {} panicked: {}", self.id, task.description(), panic.message),
                }
                shared.counters.handled.fetch_add(1, Ordering::Relaxed);
                shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Unhandled => {
                tracing::error!("No handler registered for task type {} on {}", task.task_type, shared.queue_name);
                shared.counters.unhandled.fetch_add(1, Ordering::Relaxed);
            }
        }

        if elapsed > shared.slow_task_threshold {
            shared.counters.slow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Worker {}: {} took {:?} (threshold {:?})",
                self.id,
                task.description(),
                elapsed,
                shared.slow_task_threshold
            );
        }

        if let Some(metrics) = &shared.metrics {
            match outcome.reason() {
                None => metrics.record_task_handled(&shared.queue_name, &task.task_type, elapsed.as_secs_f64()),
                Some(reason) => metrics.record_task_failed(&shared.queue_name, &task.task_type, reason),
            }
        }

        shared.counters.busy.fetch_sub(1, Ordering::Relaxed);
        shared.report_occupancy();
        outcome
    }

    /// Run the handler on its own task so a panic stays inside it
    async fn invoke(&self, task: &Task) -> TaskOutcome {
        let Some(handler) = self.shared.registry.get(&task.task_type) else {
            return TaskOutcome::Unhandled;
        };

        let ctx = HandlerContext::new(
            self.shared.queue_name.clone(),
            self.id.clone(),
            self.shared.queue.clone(),
            self.shutdown.clone(),
        );
        let owned = task.clone();

        let handle = tokio::spawn(CatchPanic::new(async move { handler.handle(&ctx, &owned).await }));

        match handle.await {
            Ok(Ok(Ok(()))) => TaskOutcome::Succeeded,
            Ok(Ok(Err(e))) => TaskOutcome::Failed(e),
            Ok(Err(panic)) => TaskOutcome::Panicked(panic),
            Err(e) if e.is_panic() => TaskOutcome::Panicked(HandlerPanic {
                message: panic_message(e.into_panic()),
                backtrace: None,
            }),
            Err(e) => TaskOutcome::Failed(Error::Handler(format!("handler task aborted: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::handler_fn;
    use crate::task::Priority;

    struct Explode;

    #[async_trait::async_trait]
    impl crate::processor::Handler for Explode {
        async fn handle(&self, _ctx: &HandlerContext, _task: &Task) -> crate::Result<()> {
            panic!("handler exploded")
        }
    }

    fn shared(queue: TaskQueue, registry: Registry) -> Arc<WorkerShared> {
        shared_with_threshold(queue, registry, Duration::from_secs(60))
    }

    fn shared_with_threshold(queue: TaskQueue, registry: Registry, threshold: Duration) -> Arc<WorkerShared> {
        Arc::new(WorkerShared {
            queue_name: Arc::from("batch"),
            queue,
            registry: Arc::new(registry),
            metrics: None,
            counters: Arc::new(WorkerCounters::default()),
            pool_size: 1,
            slow_task_threshold: threshold,
        })
    }

    fn worker(shared: Arc<WorkerShared>) -> Worker {
        let (idle_tx, _idle_rx) = mpsc::channel(1);
        let (_job_tx, job_rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = watch::channel(false);
        Worker::new(0, shared, idle_tx, job_rx, stop_rx)
    }

    async fn popped(queue: &TaskQueue, task_type: &str) -> Task {
        queue.add_task("batch", task_type, 7, b"x".to_vec(), Priority::Default).await.unwrap();
        queue.pop_next_task("batch").await.unwrap().unwrap()
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_every_outcome_releases_slot() {
        let queue = TaskQueue::in_memory();
        let mut registry = Registry::new();
        registry.register("ok", handler_fn(|_ctx, _task| async { Ok(()) }));
        registry.register(
            "err",
            handler_fn(|_ctx, _task| async { Err::<(), _>(Error::Handler("nope".into())) }),
        );
        registry.register("panic", Explode);
        let shared = shared(queue.clone(), registry);
        let worker = worker(shared.clone());

        let task = popped(&queue, "ok").await;
        assert!(matches!(worker.execute(task).await, TaskOutcome::Succeeded));
        assert_eq!(queue.in_flight("batch", 7).await.unwrap(), Some(0));

        let task = popped(&queue, "err").await;
        assert!(matches!(worker.execute(task).await, TaskOutcome::Failed(Error::Handler(_))));
        assert_eq!(queue.in_flight("batch", 7).await.unwrap(), Some(0));

        let task = popped(&queue, "panic").await;
        match worker.execute(task).await {
            TaskOutcome::Panicked(panic) => {
                assert!(panic.message.contains("handler exploded"));
                assert!(panic.backtrace.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(queue.in_flight("batch", 7).await.unwrap(), Some(0));

        let task = popped(&queue, "missing").await;
        assert!(matches!(worker.execute(task).await, TaskOutcome::Unhandled));
        assert_eq!(queue.in_flight("batch", 7).await.unwrap(), Some(0));

        let counters = &shared.counters;
        assert_eq!(counters.handled.load(Ordering::Relaxed), 3);
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.panicked.load(Ordering::Relaxed), 1);
        assert_eq!(counters.unhandled.load(Ordering::Relaxed), 1);
        assert_eq!(counters.busy.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_is_counted() {
        let queue = TaskQueue::in_memory();
        let mut registry = Registry::new();
        registry.register("fast", handler_fn(|_ctx, _task| async { Ok(()) }));
        registry.register(
            "slow",
            handler_fn(|_ctx, _task| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        );
        let shared = shared_with_threshold(queue.clone(), registry, Duration::from_secs(1));
        let worker = worker(shared.clone());

        let task = popped(&queue, "fast").await;
        assert!(matches!(worker.execute(task).await, TaskOutcome::Succeeded));
        assert_eq!(shared.counters.slow.load(Ordering::Relaxed), 0);

        let task = popped(&queue, "slow").await;
        assert!(matches!(worker.execute(task).await, TaskOutcome::Succeeded));
        assert_eq!(shared.counters.slow.load(Ordering::Relaxed), 1);
        assert_eq!(queue.in_flight("batch", 7).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_panic_backtrace_is_captured() {
        let caught = CatchPanic::new(async { panic!("deep failure"); }).await;
        let panic: HandlerPanic = match caught {
            Ok(()) => panic!("handler did not panic"),
            Err(panic) => panic,
        };
        assert_eq!(panic.message, "deep failure");
        assert!(panic.backtrace.is_some());
        assert!(!IN_HANDLER.with(Cell::get));

        // the boundary is cleared after the panic
        assert!(matches!(CatchPanic::new(async { 7 }).await, Ok(7)));
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_slot() {
        let queue = TaskQueue::in_memory();
        let task = popped(&queue, "ok").await;
        assert_eq!(queue.in_flight("batch", task.tenant_id).await.unwrap(), Some(1));

        drop(SlotGuard::new(queue.clone(), Arc::from("batch"), task.tenant_id));

        for _ in 0..100 {
            if queue.in_flight("batch", task.tenant_id).await.unwrap() == Some(0) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("slot was not released");
    }
}
