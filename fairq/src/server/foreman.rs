//! Foreman - per-queue dispatcher
//!
//! Owns a fixed pool of workers and a single assignment loop that pairs
//! idle workers with tasks popped from the queue.

use crate::observability::FairqMetrics;
use crate::processor::Registry;
use crate::queue::TaskQueue;
use crate::server::config::ForemanConfig;
use crate::server::worker::{stopped, Worker, WorkerCounters, WorkerShared};
use crate::task::{Priority, Task};
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Foreman lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForemanState {
    /// Built, not yet started
    Created,
    /// Workers and the assignment loop are running
    Started,
    /// Stop requested, waiting for in-flight tasks
    Stopping,
    /// Every loop has exited
    Stopped,
}

impl fmt::Display for ForemanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ForemanState::Created => "created",
            ForemanState::Started => "started",
            ForemanState::Stopping => "stopping",
            ForemanState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Foreman statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForemanStats {
    /// Queue being drained
    pub queue_name: String,

    /// Lifecycle state
    pub state: ForemanState,

    /// Workers in the pool
    pub pool_size: usize,

    /// Workers waiting for a task
    pub idle: usize,

    /// Workers executing a task
    pub busy: usize,

    /// Tasks handed to a handler, whatever the result
    pub handled: u64,

    /// Handler calls that returned an error
    pub failed: u64,

    /// Handler calls that panicked
    pub panicked: u64,

    /// Tasks with no registered handler
    pub unhandled: u64,

    /// Tasks that ran longer than the slow-task threshold
    pub slow: u64,
}

/// Foreman - matches idle workers to popped tasks for one queue
///
/// # Example
///
/// ```rust,no_run
/// use fairq::processor::{handler_fn, Registry};
/// use fairq::queue::TaskQueue;
/// use fairq::server::ForemanBuilder;
/// use std::sync::Arc;
///
/// # async fn example() -> fairq::Result<()> {
/// let queue = TaskQueue::connect("redis://localhost:6379").await?;
///
/// let mut registry = Registry::new();
/// registry.register("campaign", handler_fn(|_ctx, _task| async { Ok(()) }));
///
/// let mut foreman = ForemanBuilder::new("batch")
///     .pool_size(8)
///     .build(queue, Arc::new(registry))?;
///
/// foreman.start()?;
/// // ...
/// foreman.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Foreman {
    config: ForemanConfig,
    shared: Arc<WorkerShared>,
    state: ForemanState,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl fmt::Debug for Foreman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Foreman")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Foreman {
    /// Create a Foreman; prefer [`crate::server::ForemanBuilder`]
    pub(crate) fn new(
        config: ForemanConfig,
        queue: TaskQueue,
        registry: Arc<Registry>,
        metrics: Option<Arc<FairqMetrics>>,
    ) -> Self {
        let shared = Arc::new(WorkerShared {
            queue_name: Arc::from(config.queue_name.as_str()),
            queue,
            registry,
            metrics,
            counters: Arc::new(WorkerCounters::default()),
            pool_size: config.pool_size,
            slow_task_threshold: config.slow_task_threshold,
        });
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            shared,
            state: ForemanState::Created,
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    /// Queue this Foreman drains
    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Current lifecycle state
    pub fn state(&self) -> ForemanState {
        self.state
    }

    /// Launch the workers and the assignment loop
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the Foreman is already running and
    /// [`Error::Shutdown`] once it has been stopped.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ForemanState::Created => {}
            ForemanState::Started => {
                return Err(Error::Config(format!(
                    "foreman for {} is already started",
                    self.config.queue_name
                )));
            }
            ForemanState::Stopping | ForemanState::Stopped => return Err(Error::Shutdown),
        }

        tracing::info!(
            "Starting foreman for {} with {} workers",
            self.config.queue_name,
            self.config.pool_size
        );

        let (idle_tx, idle_rx) = mpsc::channel(self.config.pool_size);
        let mut job_txs = Vec::with_capacity(self.config.pool_size);

        for index in 0..self.config.pool_size {
            let (job_tx, job_rx) = mpsc::channel(1);
            job_txs.push(job_tx);
            let worker = Worker::new(
                index,
                self.shared.clone(),
                idle_tx.clone(),
                job_rx,
                self.shutdown.subscribe(),
            );
            self.tasks.spawn(worker.run());
        }

        let assigner = Assigner {
            shared: self.shared.clone(),
            poll_interval: self.config.poll_interval,
            idle_tx,
            idle_rx,
            job_txs,
            shutdown: self.shutdown.subscribe(),
        };
        self.tasks.spawn(assigner.run());

        self.shared.report_occupancy();
        self.state = ForemanState::Started;
        Ok(())
    }

    /// Stop assigning new tasks and wait for in-flight ones to finish
    ///
    /// Running handlers are never interrupted. Stopping a Foreman that was
    /// never started moves it straight to [`ForemanState::Stopped`].
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            ForemanState::Stopped => return Ok(()),
            ForemanState::Created => {
                self.state = ForemanState::Stopped;
                return Ok(());
            }
            ForemanState::Started | ForemanState::Stopping => {}
        }

        tracing::info!("Stopping foreman for {}", self.config.queue_name);
        self.state = ForemanState::Stopping;
        self.shutdown.send_replace(true);

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Foreman task for {} ended abnormally: {}", self.config.queue_name, e);
            }
        }

        self.state = ForemanState::Stopped;
        tracing::info!("Foreman for {} stopped", self.config.queue_name);
        Ok(())
    }

    /// Get foreman statistics
    pub fn stats(&self) -> ForemanStats {
        let counters = &self.shared.counters;
        let busy = counters.busy.load(Ordering::Relaxed);
        let running = self.state == ForemanState::Started || self.state == ForemanState::Stopping;

        ForemanStats {
            queue_name: self.config.queue_name.clone(),
            state: self.state,
            pool_size: self.config.pool_size,
            idle: if running { self.config.pool_size.saturating_sub(busy) } else { 0 },
            busy,
            handled: counters.handled.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
            unhandled: counters.unhandled.load(Ordering::Relaxed),
            slow: counters.slow.load(Ordering::Relaxed),
        }
    }
}

/// The single assignment loop of a Foreman
struct Assigner {
    shared: Arc<WorkerShared>,
    poll_interval: Duration,
    /// Used to hand an unused worker back to the idle pool
    idle_tx: mpsc::Sender<usize>,
    idle_rx: mpsc::Receiver<usize>,
    job_txs: Vec<mpsc::Sender<Task>>,
    shutdown: watch::Receiver<bool>,
}

impl Assigner {
    async fn run(mut self) {
        let queue_name = self.shared.queue_name.clone();
        tracing::debug!("Assignment loop for {} starting", queue_name);

        loop {
            let index = tokio::select! {
                biased;

                _ = stopped(&mut self.shutdown) => break,
                idle = self.idle_rx.recv() => match idle {
                    Some(index) => index,
                    None => break,
                },
            };

            if *self.shutdown.borrow() {
                break;
            }

            match self.shared.queue.pop_next_task(&queue_name).await {
                Ok(Some(task)) => self.assign(index, task).await,
                Ok(None) => {
                    self.return_idle(index);
                    if self.pause().await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to pop from {}: {}", queue_name, e);
                    self.return_idle(index);
                    if self.pause().await {
                        break;
                    }
                }
            }
        }

        // dropping job_txs lets the workers drain and exit
        tracing::debug!("Assignment loop for {} stopped", queue_name);
    }

    async fn assign(&self, index: usize, task: Task) {
        let queue_name = &self.shared.queue_name;
        let Some(job_tx) = self.job_txs.get(index) else {
            tracing::error!("Unknown worker index {} on {}", index, queue_name);
            self.hand_back(task).await;
            return;
        };

        if let Err(mpsc::error::SendError(task)) = job_tx.send(task).await {
            tracing::error!("Worker {} on {} is gone, re-queueing task", index, queue_name);
            self.hand_back(task).await;
        }
    }

    /// Put a popped task that no worker can take back on its tenant's queue
    async fn hand_back(&self, task: Task) {
        let queue = &self.shared.queue;
        let queue_name = &self.shared.queue_name;
        if let Err(e) = queue
            .add_task_at(queue_name, task.tenant_id, &task, task.queued_on, Priority::Default)
            .await
        {
            tracing::error!("Failed to re-queue {} on {}: {}", task.description(), queue_name, e);
        }
        if let Err(e) = queue.mark_task_complete(queue_name, task.tenant_id).await {
            tracing::error!(
                "Failed to release slot for tenant {} on {}: {}",
                task.tenant_id,
                queue_name,
                e
            );
        }
    }

    fn return_idle(&self, index: usize) {
        // capacity equals the pool size, so this only fails after shutdown
        if self.idle_tx.try_send(index).is_err() {
            tracing::debug!("Could not return worker {} to the idle pool", index);
        }
    }

    /// Sleep the poll interval; returns true if shutdown arrived meanwhile
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => false,
            _ = stopped(&mut self.shutdown) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::handler_fn;
    use crate::server::ForemanBuilder;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_state_display() {
        assert_eq!(ForemanState::Created.to_string(), "created");
        assert_eq!(ForemanState::Stopping.to_string(), "stopping");
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut foreman = ForemanBuilder::new("batch")
            .pool_size(2)
            .build(TaskQueue::in_memory(), Arc::new(Registry::new()))
            .unwrap();

        assert_eq!(foreman.state(), ForemanState::Created);
        assert_eq!(foreman.stats().idle, 0);

        foreman.start().unwrap();
        assert_eq!(foreman.state(), ForemanState::Started);
        assert!(matches!(foreman.start(), Err(Error::Config(_))));
        assert_eq!(foreman.stats().idle, 2);

        foreman.stop().await.unwrap();
        assert_eq!(foreman.state(), ForemanState::Stopped);
        foreman.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let mut foreman = ForemanBuilder::new("batch")
            .build(TaskQueue::in_memory(), Arc::new(Registry::new()))
            .unwrap();
        foreman.stop().await.unwrap();
        assert_eq!(foreman.state(), ForemanState::Stopped);
        assert!(matches!(foreman.start(), Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn test_hand_back_requeues_and_releases() {
        let queue = TaskQueue::in_memory();
        queue.add_task("batch", "campaign", 3, b"c".to_vec(), Priority::Default).await.unwrap();
        let task = queue.pop_next_task("batch").await.unwrap().unwrap();

        let foreman = ForemanBuilder::new("batch")
            .pool_size(1)
            .build(queue.clone(), Arc::new(Registry::new()))
            .unwrap();
        let (idle_tx, idle_rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let assigner = Assigner {
            shared: foreman.shared.clone(),
            poll_interval: Duration::from_millis(10),
            idle_tx,
            idle_rx,
            job_txs: Vec::new(),
            shutdown: stop_rx,
        };

        assigner.assign(0, task).await;

        assert_eq!(queue.in_flight("batch", 3).await.unwrap(), Some(0));
        assert_eq!(queue.size("batch").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drains_queue() {
        let queue = TaskQueue::in_memory();
        for tenant in 1..=3 {
            for n in 0..4u8 {
                queue.add_task("batch", "count", tenant, vec![n], Priority::Default).await.unwrap();
            }
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut registry = Registry::new();
        registry.register(
            "count",
            handler_fn(move |_ctx, _task| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let mut foreman = ForemanBuilder::new("batch")
            .pool_size(3)
            .poll_interval(Duration::from_millis(10))
            .build(queue.clone(), Arc::new(registry))
            .unwrap();
        foreman.start().unwrap();

        for _ in 0..500 {
            if seen.load(Ordering::SeqCst) == 12 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        foreman.stop().await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 12);
        assert_eq!(foreman.stats().handled, 12);
        assert_eq!(queue.size("batch").await.unwrap(), 0);
        for tenant in 1..=3 {
            // a drained tenant may already have left the registry
            assert_eq!(queue.in_flight("batch", tenant).await.unwrap().unwrap_or(0), 0);
        }
    }
}
