//! Server module
//!
//! Provides the Foreman dispatcher and a Server that runs several Foremen
//! plus an optional redelivery sweeper until shutdown.

pub mod config;
pub mod foreman;
pub mod sweeper;
mod worker;

pub use config::{ForemanBuilder, ForemanConfig};
pub use foreman::{Foreman, ForemanState, ForemanStats};
pub use sweeper::{Sweeper, SweeperConfig};

use crate::Result;
use std::future::Future;
use tokio::sync::watch;

/// Server - runs Foremen and a sweeper until shutdown
///
/// # Example
///
/// ```rust,no_run
/// use fairq::processor::{handler_fn, Registry};
/// use fairq::queue::TaskQueue;
/// use fairq::server::{ForemanBuilder, Server, Sweeper, SweeperConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> fairq::Result<()> {
/// let queue = TaskQueue::connect("redis://localhost:6379").await?;
///
/// let mut registry = Registry::new();
/// registry.register("campaign", handler_fn(|_ctx, _task| async { Ok(()) }));
/// let registry = Arc::new(registry);
///
/// let server = Server::new()
///     .foreman(ForemanBuilder::new("batch").pool_size(4).build(queue.clone(), registry.clone())?)
///     .foreman(ForemanBuilder::new("handler").pool_size(16).build(queue.clone(), registry)?)
///     .sweeper(Sweeper::new(queue, &["batch", "handler"], SweeperConfig::default()));
///
/// // Run server (this will block until Ctrl+C)
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Server {
    foremen: Vec<Foreman>,
    sweeper: Option<Sweeper>,
}

impl Server {
    /// Create an empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a Foreman
    #[must_use]
    pub fn foreman(mut self, foreman: Foreman) -> Self {
        self.foremen.push(foreman);
        self
    }

    /// Set the redelivery sweeper
    #[must_use]
    pub fn sweeper(mut self, sweeper: Sweeper) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    /// Run until Ctrl+C, then shut down gracefully
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;
        Ok(())
    }

    /// Run until `signal` completes, then shut down gracefully
    ///
    /// Every Foreman stops assigning work and waits for its in-flight tasks,
    /// and the sweeper finishes its current pass. Returns the final stats.
    pub async fn run_until<F>(mut self, signal: F) -> Result<Vec<ForemanStats>>
    where
        F: Future<Output = ()>,
    {
        for foreman in &mut self.foremen {
            foreman.start()?;
        }
        tracing::info!("Started {} foremen", self.foremen.len());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = self.sweeper.take().map(|sweeper| {
            tokio::spawn(async move { sweeper.run(shutdown_rx).await })
        });

        signal.await;

        tracing::info!("Initiating graceful shutdown");
        shutdown_tx.send_replace(true);

        for foreman in &mut self.foremen {
            foreman.stop().await?;
        }
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                tracing::error!("Sweeper ended abnormally: {}", e);
            }
        }

        let stats = self.stats();
        tracing::info!("Server stopped");
        Ok(stats)
    }

    /// Get statistics of every Foreman
    pub fn stats(&self) -> Vec<ForemanStats> {
        self.foremen.iter().map(Foreman::stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Registry;
    use crate::queue::TaskQueue;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_until_stops_every_foreman() {
        let queue = TaskQueue::in_memory();
        let registry = Arc::new(Registry::new());

        let server = Server::new()
            .foreman(ForemanBuilder::new("batch").pool_size(2).build(queue.clone(), registry.clone()).unwrap())
            .foreman(ForemanBuilder::new("handler").pool_size(3).build(queue.clone(), registry).unwrap())
            .sweeper(Sweeper::new(queue, &["batch", "handler"], SweeperConfig::default()));

        let stats = server
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();

        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.state == ForemanState::Stopped));
        assert_eq!(stats[1].pool_size, 3);
    }
}
