//! Prometheus metrics collector for fairq
//!
//! Reports worker pool occupancy, queue depth and task outcomes.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// fairq metrics collector
#[derive(Clone)]
pub struct FairqMetrics {
    registry: Arc<Registry>,

    // Task counters
    tasks_handled_total: IntCounterVec,
    tasks_failed_total: IntCounterVec,
    tasks_requeued_total: IntCounterVec,

    // Task timing
    task_duration_seconds: HistogramVec,

    // Queue gauges
    queue_depth: IntGaugeVec,

    // Worker gauges
    workers_idle: IntGaugeVec,
    workers_busy: IntGaugeVec,
}

impl FairqMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_handled_total = IntCounterVec::new(
            Opts::new("fairq_tasks_handled_total", "Total number of tasks handed to a handler"),
            &["queue", "task_type"],
        )?;

        let tasks_failed_total = IntCounterVec::new(
            Opts::new("fairq_tasks_failed_total", "Total number of tasks that did not succeed"),
            &["queue", "task_type", "reason"],
        )?;

        let tasks_requeued_total = IntCounterVec::new(
            Opts::new("fairq_tasks_requeued_total", "Total number of expired tasks redelivered"),
            &["queue"],
        )?;

        let task_duration_seconds = HistogramVec::new(
            HistogramOpts::new("fairq_task_duration_seconds", "Task handling duration in seconds")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["queue", "task_type"],
        )?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("fairq_queue_depth", "Number of pending tasks in queue"),
            &["queue"],
        )?;

        let workers_idle = IntGaugeVec::new(
            Opts::new("fairq_workers_idle", "Number of workers waiting for a task"),
            &["queue"],
        )?;

        let workers_busy = IntGaugeVec::new(
            Opts::new("fairq_workers_busy", "Number of workers handling a task"),
            &["queue"],
        )?;

        registry.register(Box::new(tasks_handled_total.clone()))?;
        registry.register(Box::new(tasks_failed_total.clone()))?;
        registry.register(Box::new(tasks_requeued_total.clone()))?;
        registry.register(Box::new(task_duration_seconds.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(workers_idle.clone()))?;
        registry.register(Box::new(workers_busy.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            tasks_handled_total,
            tasks_failed_total,
            tasks_requeued_total,
            task_duration_seconds,
            queue_depth,
            workers_idle,
            workers_busy,
        })
    }

    /// Record a task handed to a handler and how long it took
    pub fn record_task_handled(&self, queue: &str, task_type: &str, duration_secs: f64) {
        self.tasks_handled_total
            .with_label_values(&[queue, task_type])
            .inc();
        self.task_duration_seconds
            .with_label_values(&[queue, task_type])
            .observe(duration_secs);
    }

    /// Record a task that failed, panicked or had no handler
    pub fn record_task_failed(&self, queue: &str, task_type: &str, reason: &str) {
        self.tasks_failed_total
            .with_label_values(&[queue, task_type, reason])
            .inc();
    }

    /// Record tasks redelivered by a sweep
    pub fn record_requeued(&self, queue: &str, count: usize) {
        self.tasks_requeued_total
            .with_label_values(&[queue])
            .inc_by(count as u64);
    }

    /// Update queue depth
    pub fn set_queue_depth(&self, queue: &str, depth: u64) {
        self.queue_depth
            .with_label_values(&[queue])
            .set(depth as i64);
    }

    /// Update worker pool occupancy
    pub fn set_workers(&self, queue: &str, idle: usize, busy: usize) {
        self.workers_idle.with_label_values(&[queue]).set(idle as i64);
        self.workers_busy.with_label_values(&[queue]).set(busy as i64);
    }

    /// Get the registry for custom metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }
}
