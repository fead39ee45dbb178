//! Storage layer
//!
//! Defines the atomic primitives the queue engine needs from its store, with
//! a Redis implementation for shared deployments and an in-memory one for
//! single-process use.

pub mod keys;
pub mod memory;
pub mod redis;

pub use keys::Keys;
pub use memory::MemoryStore;
pub use redis::{RedisClient, RedisConfig, RedisStore};

use crate::task::{Fingerprint, TenantId};
use crate::Result;
use async_trait::async_trait;

/// Result of one atomic pop attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopOutcome {
    /// The active registry is empty
    Empty,
    /// The least-loaded tenant had no pending work and was removed from the
    /// active registry; the caller should try again
    Retry(TenantId),
    /// A task was removed from the tenant's pending set and the tenant's
    /// in-flight count was incremented
    Popped(TenantId, Vec<u8>),
}

/// Queue Store
///
/// Every method is one indivisible operation against the store. Scores are
/// seconds since the Unix epoch (with priority offsets already applied).
///
/// Ordering rules every implementation follows:
/// - pending sets pop the lowest score first, ties by member bytes
/// - the active registry picks the lowest in-flight count first, ties by the
///   tenant id's decimal string
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a task into the tenant's pending set and register the tenant in
    /// the active registry with a count of zero if it is not already present
    async fn push(&self, queue: &str, tenant_id: TenantId, task: Vec<u8>, score: f64) -> Result<()>;

    /// Pop from the tenant with the fewest in-flight tasks
    async fn pop(&self, queue: &str) -> Result<PopOutcome>;

    /// Sum of pending tasks over the tenants in the active registry
    async fn size(&self, queue: &str) -> Result<u64>;

    /// Decrement the tenant's in-flight count, clamped at zero
    async fn release(&self, queue: &str, tenant_id: TenantId) -> Result<()>;

    /// Tenants currently in the active registry with their in-flight counts,
    /// in registry order
    async fn active_tenants(&self, queue: &str) -> Result<Vec<(TenantId, i64)>>;

    /// Add a processing entry unless one already exists; returns whether it
    /// was added
    async fn add_processing(
        &self,
        queue: &str,
        tenant_id: TenantId,
        fingerprint: &Fingerprint,
        deadline: f64,
    ) -> Result<bool>;

    /// Remove a processing entry
    async fn remove_processing(&self, queue: &str, tenant_id: TenantId, fingerprint: &Fingerprint) -> Result<()>;

    /// Processing entries whose deadline is at or before `now`
    async fn expired_processing(&self, queue: &str, tenant_id: TenantId, now: f64) -> Result<Vec<Fingerprint>>;

    /// Store the serialized task of a processing entry
    async fn set_payload(&self, queue: &str, fingerprint: &Fingerprint, task: Vec<u8>) -> Result<()>;

    /// Load the serialized task of a processing entry
    async fn get_payload(&self, queue: &str, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>>;

    /// Delete the serialized task of a processing entry
    async fn delete_payload(&self, queue: &str, fingerprint: &Fingerprint) -> Result<()>;
}
