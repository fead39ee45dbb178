//! Common test utilities
//!
//! Shared helper functions and fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fairq::config::QueueConfig;
use fairq::processor::{Handler, HandlerContext};
use fairq::storage::RedisStore;
use fairq::{Task, TaskQueue};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Redis URL from the environment, defaulting to localhost
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Queue name that no other test run shares
pub fn unique_queue(test_name: &str) -> String {
    format!("test-{}-{}", test_name, uuid::Uuid::new_v4())
}

/// Queue engine on a Redis server
pub async fn redis_queue() -> TaskQueue {
    let store = RedisStore::connect(redis_url())
        .await
        .expect("Failed to connect to Redis");
    TaskQueue::new(Arc::new(store), QueueConfig::default()).expect("Failed to create queue")
}

/// Install a test log subscriber; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pop until the queue is empty, returning payloads as strings
pub async fn drain(queue: &TaskQueue, queue_name: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(task) = queue.pop_next_task(queue_name).await.expect("pop failed") {
        payloads.push(String::from_utf8_lossy(&task.payload).into_owned());
    }
    payloads
}

/// Handler that records every task it receives
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<Task>>>,
}

impl RecordingHandler {
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|t| String::from_utf8_lossy(&t.payload).into_owned())
            .collect()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, _ctx: &HandlerContext, task: &Task) -> fairq::Result<()> {
        self.seen.lock().unwrap().push(task.clone());
        Ok(())
    }
}

/// Wait for a condition to be true
///
/// # Returns
/// Ok(()) if condition was met, Err if timeout occurred
pub async fn wait_for<F>(
    mut condition: F,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let check_interval = Duration::from_millis(10);

    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(check_interval).await;
    }

    Err(format!("Condition not met after {:?}", timeout).into())
}
