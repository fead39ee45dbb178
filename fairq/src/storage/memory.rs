//! In-memory Queue Store
//!
//! Serializes every operation through a single mutex, which gives the same
//! atomicity a Redis script does for all callers sharing this store (one
//! process). Sorted sets replicate Redis ordering so both stores pop in the
//! same order.

use super::{PopOutcome, QueueStore};
use crate::task::{Fingerprint, TenantId};
use crate::{Error, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Totally ordered score
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set with Redis ZSET semantics: unique members, ordered by score then
/// by member
#[derive(Debug)]
struct SortedSet<M> {
    scores: HashMap<M, f64>,
    ordered: BTreeSet<(Score, M)>,
}

impl<M> Default for SortedSet<M> {
    fn default() -> Self {
        Self {
            scores: HashMap::new(),
            ordered: BTreeSet::new(),
        }
    }
}

impl<M: Clone + Ord + Hash> SortedSet<M> {
    fn len(&self) -> usize {
        self.scores.len()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn score(&self, member: &M) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// ZADD
    fn insert(&mut self, member: M, score: f64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(Score(old), member.clone()));
        }
        self.ordered.insert((Score(score), member));
    }

    /// ZADD NX
    fn insert_nx(&mut self, member: M, score: f64) -> bool {
        if self.scores.contains_key(&member) {
            return false;
        }
        self.insert(member, score);
        true
    }

    /// ZINCRBY
    fn incr(&mut self, member: M, by: f64) -> f64 {
        let score = self.score(&member).unwrap_or(0.0) + by;
        self.insert(member, score);
        score
    }

    /// ZREM
    fn remove(&mut self, member: &M) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.clone()));
                true
            }
            None => false,
        }
    }

    fn first(&self) -> Option<&M> {
        self.ordered.first().map(|(_, m)| m)
    }

    fn pop_first(&mut self) -> Option<M> {
        let (_, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

    fn iter(&self) -> impl Iterator<Item = (&M, f64)> {
        self.ordered.iter().map(|(s, m)| (m, s.0))
    }

    /// ZRANGEBYSCORE -inf max
    fn up_to(&self, max: f64) -> Vec<M> {
        self.ordered
            .iter()
            .take_while(|(s, _)| s.0 <= max)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

/// Per-queue state
#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<TenantId, SortedSet<Vec<u8>>>,
    // members are tenant ids rendered as strings so ties order like Redis
    active: SortedSet<String>,
    processing: HashMap<TenantId, SortedSet<String>>,
    payloads: HashMap<String, Vec<u8>>,
}

/// In-memory Queue Store
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>> {
        self.queues
            .lock()
            .map_err(|e| Error::Store(format!("memory store lock poisoned: {}", e)))
    }
}

fn parse_tenant(member: &str) -> Result<TenantId> {
    member
        .parse()
        .map_err(|_| Error::Store(format!("invalid tenant in active registry: {}", member)))
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, queue: &str, tenant_id: TenantId, task: Vec<u8>, score: f64) -> Result<()> {
        let mut queues = self.lock()?;
        let state = queues.entry(queue.to_string()).or_default();
        state.pending.entry(tenant_id).or_default().insert(task, score);
        state.active.insert_nx(tenant_id.to_string(), 0.0);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<PopOutcome> {
        let mut queues = self.lock()?;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(PopOutcome::Empty);
        };
        let Some(member) = state.active.first().cloned() else {
            return Ok(PopOutcome::Empty);
        };
        let tenant_id = parse_tenant(&member)?;

        let popped = match state.pending.get_mut(&tenant_id) {
            Some(pending) => {
                let task = pending.pop_first();
                if pending.is_empty() {
                    state.pending.remove(&tenant_id);
                }
                task
            }
            None => None,
        };

        match popped {
            Some(task) => {
                state.active.incr(member, 1.0);
                Ok(PopOutcome::Popped(tenant_id, task))
            }
            None => {
                state.active.remove(&member);
                Ok(PopOutcome::Retry(tenant_id))
            }
        }
    }

    async fn size(&self, queue: &str) -> Result<u64> {
        let queues = self.lock()?;
        let Some(state) = queues.get(queue) else {
            return Ok(0);
        };
        let mut total = 0u64;
        for (member, _) in state.active.iter() {
            let tenant_id = parse_tenant(member)?;
            total += state.pending.get(&tenant_id).map_or(0, |p| p.len() as u64);
        }
        Ok(total)
    }

    async fn release(&self, queue: &str, tenant_id: TenantId) -> Result<()> {
        let mut queues = self.lock()?;
        let state = queues.entry(queue.to_string()).or_default();
        let member = tenant_id.to_string();
        if state.active.incr(member.clone(), -1.0) < 0.0 {
            state.active.insert(member, 0.0);
        }
        Ok(())
    }

    async fn active_tenants(&self, queue: &str) -> Result<Vec<(TenantId, i64)>> {
        let queues = self.lock()?;
        let Some(state) = queues.get(queue) else {
            return Ok(Vec::new());
        };
        state
            .active
            .iter()
            .map(|(member, count)| Ok((parse_tenant(member)?, count as i64)))
            .collect()
    }

    async fn add_processing(
        &self,
        queue: &str,
        tenant_id: TenantId,
        fingerprint: &Fingerprint,
        deadline: f64,
    ) -> Result<bool> {
        let mut queues = self.lock()?;
        let state = queues.entry(queue.to_string()).or_default();
        Ok(state
            .processing
            .entry(tenant_id)
            .or_default()
            .insert_nx(fingerprint.to_string(), deadline))
    }

    async fn remove_processing(&self, queue: &str, tenant_id: TenantId, fingerprint: &Fingerprint) -> Result<()> {
        let mut queues = self.lock()?;
        if let Some(state) = queues.get_mut(queue) {
            if let Some(processing) = state.processing.get_mut(&tenant_id) {
                processing.remove(&fingerprint.to_string());
                if processing.is_empty() {
                    state.processing.remove(&tenant_id);
                }
            }
        }
        Ok(())
    }

    async fn expired_processing(&self, queue: &str, tenant_id: TenantId, now: f64) -> Result<Vec<Fingerprint>> {
        let queues = self.lock()?;
        Ok(queues
            .get(queue)
            .and_then(|state| state.processing.get(&tenant_id))
            .map(|processing| {
                processing
                    .up_to(now)
                    .into_iter()
                    .map(Fingerprint::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    async fn set_payload(&self, queue: &str, fingerprint: &Fingerprint, task: Vec<u8>) -> Result<()> {
        let mut queues = self.lock()?;
        let state = queues.entry(queue.to_string()).or_default();
        state.payloads.insert(fingerprint.to_string(), task);
        Ok(())
    }

    async fn get_payload(&self, queue: &str, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let queues = self.lock()?;
        Ok(queues
            .get(queue)
            .and_then(|state| state.payloads.get(fingerprint.as_str()))
            .cloned())
    }

    async fn delete_payload(&self, queue: &str, fingerprint: &Fingerprint) -> Result<()> {
        let mut queues = self.lock()?;
        if let Some(state) = queues.get_mut(queue) {
            state.payloads.remove(fingerprint.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_set_orders_by_score_then_member() {
        let mut set = SortedSet::default();
        set.insert("b".to_string(), 1.0);
        set.insert("a".to_string(), 1.0);
        set.insert("c".to_string(), 0.5);
        assert_eq!(set.pop_first().as_deref(), Some("c"));
        assert_eq!(set.pop_first().as_deref(), Some("a"));
        assert_eq!(set.pop_first().as_deref(), Some("b"));
        assert!(set.pop_first().is_none());
    }

    #[test]
    fn test_sorted_set_update_and_nx() {
        let mut set = SortedSet::default();
        set.insert("x".to_string(), 5.0);
        set.insert("x".to_string(), 1.0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.score(&"x".to_string()), Some(1.0));

        assert!(!set.insert_nx("x".to_string(), 9.0));
        assert_eq!(set.score(&"x".to_string()), Some(1.0));
        assert!(set.insert_nx("y".to_string(), 9.0));

        assert_eq!(set.incr("x".to_string(), 2.0), 3.0);
        assert_eq!(set.up_to(3.0), vec!["x".to_string()]);
        assert!(set.remove(&"x".to_string()));
        assert!(!set.remove(&"x".to_string()));
    }

    #[tokio::test]
    async fn test_registry_ties_use_string_order() {
        let store = MemoryStore::new();
        store.push("q", 10, b"t10".to_vec(), 1.0).await.unwrap();
        store.push("q", 9, b"t9".to_vec(), 1.0).await.unwrap();

        // "10" sorts before "9", as it does in a Redis ZSET
        assert_eq!(store.pop("q").await.unwrap(), PopOutcome::Popped(10, b"t10".to_vec()));
        assert_eq!(store.pop("q").await.unwrap(), PopOutcome::Popped(9, b"t9".to_vec()));
    }

    #[tokio::test]
    async fn test_pop_retry_removes_drained_tenant() {
        let store = MemoryStore::new();
        assert_eq!(store.pop("q").await.unwrap(), PopOutcome::Empty);

        store.push("q", 1, b"a".to_vec(), 1.0).await.unwrap();
        assert_eq!(store.pop("q").await.unwrap(), PopOutcome::Popped(1, b"a".to_vec()));
        store.release("q", 1).await.unwrap();

        assert_eq!(store.pop("q").await.unwrap(), PopOutcome::Retry(1));
        assert!(store.active_tenants("q").await.unwrap().is_empty());
        assert_eq!(store.pop("q").await.unwrap(), PopOutcome::Empty);
    }

    #[tokio::test]
    async fn test_release_clamps_at_zero() {
        let store = MemoryStore::new();
        store.push("q", 1, b"a".to_vec(), 1.0).await.unwrap();
        store.release("q", 1).await.unwrap();
        store.release("q", 1).await.unwrap();
        assert_eq!(store.active_tenants("q").await.unwrap(), vec![(1, 0)]);
    }

    #[tokio::test]
    async fn test_processing_entries() {
        let store = MemoryStore::new();
        let fp = Fingerprint::from("fp".to_string());

        assert!(store.add_processing("q", 1, &fp, 10.0).await.unwrap());
        assert!(!store.add_processing("q", 1, &fp, 99.0).await.unwrap());
        assert!(store.expired_processing("q", 1, 9.0).await.unwrap().is_empty());
        assert_eq!(store.expired_processing("q", 1, 10.0).await.unwrap(), vec![fp.clone()]);

        store.set_payload("q", &fp, b"task".to_vec()).await.unwrap();
        assert_eq!(store.get_payload("q", &fp).await.unwrap(), Some(b"task".to_vec()));

        store.remove_processing("q", 1, &fp).await.unwrap();
        store.delete_payload("q", &fp).await.unwrap();
        assert!(store.expired_processing("q", 1, 100.0).await.unwrap().is_empty());
        assert_eq!(store.get_payload("q", &fp).await.unwrap(), None);
    }
}
