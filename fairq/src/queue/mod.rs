//! Task queue engine
//!
//! Enqueue, fairness-aware dequeue, completion, and the opt-in durable
//! processing path with backoff-based redelivery, on top of a [`QueueStore`].
//!
//! # Fairness
//!
//! Each queue keeps one pending set per tenant and an active registry that
//! maps every tenant to its number of in-flight tasks. A pop always serves
//! the tenant with the fewest tasks in flight, so a tenant with a large
//! backlog cannot starve a tenant with a small one.
//!
//! # Durable processing
//!
//! A handler that must survive a crash calls [`TaskQueue::begin_processing`]
//! before its slow work and [`TaskQueue::end_processing`] after it. A periodic
//! [`TaskQueue::requeue_expired`] sweep redelivers entries whose deadline has
//! passed. Redelivery does not stop the original execution: a handler that is
//! merely slow can run concurrently with its redelivered copy. Delivery is at
//! least once, never exactly once.

use crate::config::QueueConfig;
use crate::storage::{Keys, MemoryStore, PopOutcome, QueueStore, RedisStore};
use crate::task::{Fingerprint, Priority, Task, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Task queue engine
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn QueueStore>,
    config: Arc<QueueConfig>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Score of a task enqueued at `at` with `priority`
///
/// Whole microseconds since the epoch, in seconds, plus the priority offset.
pub fn score(at: DateTime<Utc>, priority: Priority) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0 + priority.offset()
}

fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

impl TaskQueue {
    /// Create an engine over the given store
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
        })
    }

    /// Create an engine over a fresh in-process store
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            config: Arc::new(QueueConfig::default()),
        }
    }

    /// Connect to Redis with default settings
    pub async fn connect(redis_url: impl Into<String>) -> Result<Self> {
        Self::connect_with(redis_url, QueueConfig::default()).await
    }

    /// Connect to Redis, laying out keys under `config.key_prefix`
    pub async fn connect_with(redis_url: impl Into<String>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::connect(redis_url).await?;
        let store = RedisStore::with_keys(store.redis().clone(), Keys::new(config.key_prefix.as_str()));
        Self::new(Arc::new(store), config)
    }

    /// Get the engine configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Get the underlying store
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    fn validate(&self, queue: &str, task: &Task) -> Result<()> {
        if queue.is_empty() {
            return Err(Error::Validation("queue cannot be empty".into()));
        }
        if task.task_type.is_empty() {
            return Err(Error::Validation("task type cannot be empty".into()));
        }
        if task.payload.len() > self.config.max_payload_size {
            return Err(Error::Validation(format!(
                "payload exceeds {}KB limit (got {}B)",
                self.config.max_payload_size / 1024,
                task.payload.len()
            )));
        }
        Ok(())
    }

    /// Enqueue a new task for a tenant
    ///
    /// The task is visible to `size` and `pop_next_task` as soon as this
    /// returns.
    pub async fn add_task(
        &self,
        queue: &str,
        task_type: &str,
        tenant_id: TenantId,
        payload: impl Into<Vec<u8>>,
        priority: Priority,
    ) -> Result<()> {
        let task = Task::new(task_type, tenant_id, payload);
        self.add_task_at(queue, tenant_id, &task, Utc::now(), priority).await
    }

    /// Enqueue an existing task with an explicit time component in its score
    pub async fn add_task_at(
        &self,
        queue: &str,
        tenant_id: TenantId,
        task: &Task,
        at: DateTime<Utc>,
        priority: Priority,
    ) -> Result<()> {
        self.validate(queue, task)?;
        let data = task.encode()?;
        self.store.push(queue, tenant_id, data, score(at, priority)).await?;
        tracing::debug!("Queued {} on {} (priority {})", task.description(), queue, priority);
        Ok(())
    }

    /// Number of pending tasks across every tenant in the active registry
    pub async fn size(&self, queue: &str) -> Result<u64> {
        self.store.size(queue).await
    }

    /// Pop the next task, preferring the tenant with the fewest tasks in flight
    ///
    /// On success the tenant's in-flight count has been incremented, and the
    /// caller owes exactly one [`TaskQueue::mark_task_complete`] for it.
    /// Returns `None` once the active registry is empty.
    pub async fn pop_next_task(&self, queue: &str) -> Result<Option<Task>> {
        loop {
            match self.store.pop(queue).await? {
                PopOutcome::Empty => return Ok(None),
                PopOutcome::Retry(tenant_id) => {
                    tracing::trace!("Tenant {} drained from {}, retrying pop", tenant_id, queue);
                }
                PopOutcome::Popped(tenant_id, data) => {
                    return match Task::decode(&data) {
                        Ok(task) => Ok(Some(task)),
                        Err(e) => {
                            // the slot was taken by the pop; give it back
                            if let Err(release) = self.store.release(queue, tenant_id).await {
                                tracing::error!(
                                    "Failed to release slot for tenant {} on {}: {}",
                                    tenant_id, queue, release
                                );
                            }
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    /// Release the tenant's fairness slot taken by a pop
    ///
    /// Never drives the in-flight count below zero.
    pub async fn mark_task_complete(&self, queue: &str, tenant_id: TenantId) -> Result<()> {
        self.store.release(queue, tenant_id).await
    }

    /// Tenants in the active registry with their in-flight counts
    pub async fn active_tenants(&self, queue: &str) -> Result<Vec<(TenantId, i64)>> {
        self.store.active_tenants(queue).await
    }

    /// In-flight count of one tenant, `None` if it is not in the registry
    pub async fn in_flight(&self, queue: &str, tenant_id: TenantId) -> Result<Option<i64>> {
        Ok(self
            .active_tenants(queue)
            .await?
            .into_iter()
            .find(|(t, _)| *t == tenant_id)
            .map(|(_, count)| count))
    }

    /// Record that `task` is being worked on until `now + ttl`
    ///
    /// An existing entry for the same fingerprint keeps its deadline. Returns
    /// the fingerprint to pass to [`TaskQueue::end_processing`].
    pub async fn begin_processing(
        &self,
        queue: &str,
        tenant_id: TenantId,
        task: &Task,
        ttl: Duration,
    ) -> Result<Fingerprint> {
        let fingerprint = task.fingerprint();
        let data = task.encode()?;
        let deadline = epoch_secs(Utc::now()) + ttl.as_secs_f64();

        let added = self
            .store
            .add_processing(queue, tenant_id, &fingerprint, deadline)
            .await?;

        if let Err(e) = self.store.set_payload(queue, &fingerprint, data).await {
            if added {
                if let Err(rollback) = self.store.remove_processing(queue, tenant_id, &fingerprint).await {
                    tracing::error!(
                        "Failed to roll back processing entry {} on {}: {}",
                        fingerprint, queue, rollback
                    );
                }
            }
            return Err(e);
        }

        tracing::debug!(
            "Processing {} on {} until +{:?} ({})",
            task.description(),
            queue,
            ttl,
            fingerprint
        );
        Ok(fingerprint)
    }

    /// Remove a processing entry and its stored task
    ///
    /// An empty fingerprint is a no-op, so cleanup can be deferred
    /// unconditionally.
    pub async fn end_processing(&self, queue: &str, tenant_id: TenantId, fingerprint: &Fingerprint) -> Result<()> {
        if fingerprint.is_empty() {
            return Ok(());
        }
        self.store.remove_processing(queue, tenant_id, fingerprint).await?;
        self.store.delete_payload(queue, fingerprint).await?;
        Ok(())
    }

    /// Redeliver processing entries whose deadline passed before `now`
    ///
    /// Each recovered task gets its `error_count` incremented and is re-queued
    /// at default priority after a backoff delay; the tenant's slot held by the
    /// presumed-dead worker is released. Entries whose stored task is missing
    /// or unreadable are dropped. Only tenants in the active registry are
    /// swept. Returns the number of tasks re-queued.
    pub async fn requeue_expired(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let now_secs = epoch_secs(now);
        let mut requeued = 0;

        for (tenant_id, _) in self.store.active_tenants(queue).await? {
            for fingerprint in self.store.expired_processing(queue, tenant_id, now_secs).await? {
                let task = match self.store.get_payload(queue, &fingerprint).await? {
                    Some(data) => match Task::decode(&data) {
                        Ok(task) => Some(task),
                        Err(e) => {
                            tracing::warn!(
                                "Dropping unreadable processing entry {} for tenant {} on {}: {}",
                                fingerprint, tenant_id, queue, e
                            );
                            None
                        }
                    },
                    None => {
                        tracing::warn!(
                            "Dropping processing entry {} for tenant {} on {}: stored task missing",
                            fingerprint, tenant_id, queue
                        );
                        None
                    }
                };

                if let Some(mut task) = task {
                    task.error_count += 1;
                    let delay = self.config.backoff(task.error_count);
                    let at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    self.add_task_at(queue, tenant_id, &task, at, Priority::Default).await?;
                    self.store.release(queue, tenant_id).await?;
                    requeued += 1;
                    tracing::info!(
                        "Requeued expired {} on {} in {:?}",
                        task.description(),
                        queue,
                        delay
                    );
                }

                self.store.remove_processing(queue, tenant_id, &fingerprint).await?;
                self.store.delete_payload(queue, &fingerprint).await?;
            }
        }

        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_score_components() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(score(at, Priority::Default), 1_700_000_000.123456);
        assert_eq!(score(at, Priority::High), 1_700_000_000.123456 - 10_000_000.0);
        assert!(score(at, Priority::High) < score(at + chrono::Duration::days(30), Priority::Default));
        assert!(score(at, Priority::Low) > score(at + chrono::Duration::days(30), Priority::Default));
    }

    #[tokio::test]
    async fn test_add_task_validation() {
        let queue = TaskQueue::in_memory();
        assert!(matches!(
            queue.add_task("", "campaign", 1, b"x".to_vec(), Priority::Default).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            queue.add_task("batch", "", 1, b"x".to_vec(), Priority::Default).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            queue.add_task("batch", "campaign", 1, vec![0u8; 600 * 1024], Priority::Default).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(queue.size("batch").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_pop_releases_slot() {
        let queue = TaskQueue::in_memory();
        queue.store().push("batch", 5, b"garbage".to_vec(), 1.0).await.unwrap();

        assert!(matches!(queue.pop_next_task("batch").await, Err(Error::Serialization(_))));
        assert_eq!(queue.in_flight("batch", 5).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_end_processing_empty_handle() {
        let queue = TaskQueue::in_memory();
        queue.end_processing("batch", 1, &Fingerprint::default()).await.unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        assert!(TaskQueue::new(store, QueueConfig::new().with_key_prefix("")).is_err());
    }
}
