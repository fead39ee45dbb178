//! # fairq
//!
//! fairq is a multi-tenant fair task queue based on Rust and Redis.
//!
//! ## Features
//!
//! - Per-tenant pending queues ordered by priority, then enqueue time
//! - Fair dequeue: the tenant with the fewest tasks in flight goes first
//! - Per-queue dispatcher (Foreman) with a fixed worker pool
//! - Opt-in durable processing with backoff-based redelivery
//! - Prometheus monitoring hooks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fairq::processor::{handler_fn, Registry};
//! use fairq::server::{ForemanBuilder, Server};
//! use fairq::{Priority, TaskQueue};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = TaskQueue::connect("redis://localhost:6379").await?;
//!
//!     // Producer side: enqueue tasks for a tenant
//!     queue
//!         .add_task("batch", "campaign:start", 42, b"spring-sale".to_vec(), Priority::Default)
//!         .await?;
//!
//!     // Consumer side: process tasks
//!     let mut registry = Registry::new();
//!     registry.register("campaign:start", handler_fn(|_ctx, task| async move {
//!         tracing::info!("starting campaign for tenant {}", task.tenant_id);
//!         Ok(())
//!     }));
//!
//!     let foreman = ForemanBuilder::new("batch")
//!         .pool_size(10)
//!         .build(queue, Arc::new(registry))?;
//!
//!     Server::new().foreman(foreman).run().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Public module exports
pub mod config;
pub mod error;
pub mod task;

// Queue engine
pub mod queue;

// Dispatcher/Worker
pub mod server;

// Handlers
pub mod processor;

// Storage layer
pub mod storage;

// Observability
pub mod observability;

// Re-export common types
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use processor::{Handler, HandlerContext, Registry};
pub use queue::TaskQueue;
pub use server::{Foreman, ForemanBuilder};
pub use task::{Priority, Task, TenantId};
