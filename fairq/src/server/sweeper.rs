//! Sweeper - expired processing entry recovery
//!
//! Periodically redelivers tasks whose durable processing deadline passed,
//! and reports queue depth.

use crate::observability::FairqMetrics;
use crate::queue::TaskQueue;
use crate::server::worker::stopped;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Configuration for the sweeper
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl SweeperConfig {
    /// Create a new sweeper configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval
    #[must_use]
    pub fn interval(mut self, duration: Duration) -> Self {
        self.interval = duration;
        self
    }
}

/// Sweeper - calls [`TaskQueue::requeue_expired`] on a timer
pub struct Sweeper {
    queue: TaskQueue,
    queues: Vec<String>,
    config: SweeperConfig,
    metrics: Option<Arc<FairqMetrics>>,
}

impl Sweeper {
    /// Create a sweeper for the given queue names
    pub fn new(queue: TaskQueue, queues: &[&str], config: SweeperConfig) -> Self {
        Self {
            queue,
            queues: queues.iter().map(|q| q.to_string()).collect(),
            config,
            metrics: None,
        }
    }

    /// Report requeue counts and queue depth to a metrics collector
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<FairqMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue names being swept
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Start the sweep loop; returns once `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // Skip first immediate tick

        tracing::info!(
            "Sweeper started (interval: {:?}, queues: {:?})",
            self.config.interval,
            self.queues
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = stopped(&mut shutdown) => break,
            }

            let requeued = self.sweep_once().await;
            if requeued > 0 {
                tracing::debug!("Sweeper requeued {} expired tasks", requeued);
            }
        }

        tracing::info!("Sweeper stopped");
    }

    /// Sweep every queue once
    ///
    /// Errors are logged per queue and do not stop the remaining queues.
    /// Returns the total number of tasks re-queued.
    pub async fn sweep_once(&self) -> usize {
        let mut total = 0;
        for queue_name in &self.queues {
            match self.sweep_queue(queue_name).await {
                Ok(count) => total += count,
                Err(e) => tracing::error!("Sweep of {} failed: {}", queue_name, e),
            }
        }
        total
    }

    async fn sweep_queue(&self, queue_name: &str) -> Result<usize> {
        let requeued = self.queue.requeue_expired(queue_name, Utc::now()).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_requeued(queue_name, requeued);
            let depth = self.queue.size(queue_name).await?;
            metrics.set_queue_depth(queue_name, depth);
        }

        Ok(requeued)
    }
}
