//! Foreman configuration and builder
//!
//! Provides configuration structures for the per-queue dispatcher.

use crate::observability::FairqMetrics;
use crate::processor::Registry;
use crate::queue::TaskQueue;
use crate::server::foreman::Foreman;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Foreman configuration
#[derive(Debug, Clone)]
pub struct ForemanConfig {
    /// Queue to drain
    pub queue_name: String,

    /// Number of workers in the pool
    pub pool_size: usize,

    /// Wait after an empty poll or a store error before popping again
    pub poll_interval: Duration,

    /// Handling time after which a warning is logged
    pub slow_task_threshold: Duration,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            queue_name: "default".to_string(),
            pool_size: 10,
            poll_interval: Duration::from_millis(250),
            slow_task_threshold: Duration::from_secs(60),
        }
    }
}

impl ForemanConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue_name.is_empty() {
            return Err(Error::Config("queue_name cannot be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be greater than 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Foreman builder
///
/// Provides a fluent interface for configuring and building a Foreman.
///
/// # Example
///
/// ```rust
/// use fairq::processor::Registry;
/// use fairq::queue::TaskQueue;
/// use fairq::server::ForemanBuilder;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> fairq::Result<()> {
/// let foreman = ForemanBuilder::new("batch")
///     .pool_size(4)
///     .poll_interval(Duration::from_millis(100))
///     .build(TaskQueue::in_memory(), Arc::new(Registry::new()))?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ForemanBuilder {
    config: ForemanConfig,
    metrics: Option<Arc<FairqMetrics>>,
}

impl ForemanBuilder {
    /// Create a builder for the given queue with default settings
    #[must_use]
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            config: ForemanConfig {
                queue_name: queue_name.into(),
                ..Default::default()
            },
            metrics: None,
        }
    }

    /// Set the number of workers
    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    /// Set the wait after an empty poll
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the handling time after which a warning is logged
    #[must_use]
    pub fn slow_task_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_task_threshold = threshold;
        self
    }

    /// Report pool occupancy and task outcomes to a metrics collector
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<FairqMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the Foreman
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self, queue: TaskQueue, registry: Arc<Registry>) -> Result<Foreman> {
        self.config.validate()?;
        Ok(Foreman::new(self.config, queue, registry, self.metrics))
    }
}
