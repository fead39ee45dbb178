//! Redis-backed Queue Store

use super::{scripts, RedisClient};
use crate::storage::{Keys, PopOutcome, QueueStore};
use crate::task::{Fingerprint, TenantId};
use crate::{Error, Result};
use async_trait::async_trait;
use fred::prelude::{RedisKey, RedisValue};

/// Redis-backed Queue Store
///
/// Push, pop, size and release run as Lua scripts; the durable-path
/// operations are single commands.
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisClient,
    keys: Keys,
}

impl RedisStore {
    /// Create a store using the default key prefix
    pub fn new(redis: RedisClient) -> Self {
        Self::with_keys(redis, Keys::default())
    }

    /// Create a store with a custom key layout
    pub fn with_keys(redis: RedisClient, keys: Keys) -> Self {
        Self { redis, keys }
    }

    /// Connect to Redis at the given URL
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        let redis = RedisClient::from_url(url).await?;
        redis.ping().await?;
        Ok(Self::new(redis))
    }

    /// Get the underlying client
    pub fn redis(&self) -> &RedisClient {
        &self.redis
    }

    /// Get the key layout
    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

fn into_bytes(value: RedisValue) -> Option<Vec<u8>> {
    match value {
        RedisValue::Bytes(b) => Some(b.to_vec()),
        RedisValue::String(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

fn parse_tenant(value: &RedisValue) -> Result<TenantId> {
    value
        .as_string()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Serialization(format!("invalid tenant id returned by store: {:?}", value)))
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(&self, queue: &str, tenant_id: TenantId, task: Vec<u8>, score: f64) -> Result<()> {
        let keys: Vec<RedisKey> = vec![
            self.keys.pending(queue, tenant_id).into(),
            self.keys.active(queue).into(),
        ];
        let args: Vec<RedisValue> = vec![
            format!("{:.6}", score).into(),
            RedisValue::Bytes(task.into()),
            tenant_id.to_string().into(),
        ];
        self.redis.eval(scripts::PUSH, keys, args).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<PopOutcome> {
        let keys: Vec<RedisKey> = vec![self.keys.active(queue).into()];
        let args: Vec<RedisValue> = vec![self.keys.pending_prefix(queue).into()];
        let reply = self.redis.eval(scripts::POP, keys, args).await?.into_array();

        let mut reply = reply.into_iter();
        let (Some(status), Some(tenant), Some(task)) = (reply.next(), reply.next(), reply.next()) else {
            return Err(Error::Serialization("malformed pop reply".into()));
        };

        match status.as_string().as_deref() {
            Some("empty") => Ok(PopOutcome::Empty),
            Some("retry") => Ok(PopOutcome::Retry(parse_tenant(&tenant)?)),
            Some("ok") => {
                let tenant_id = parse_tenant(&tenant)?;
                let task = into_bytes(task)
                    .ok_or_else(|| Error::Serialization("popped task is not a string".into()))?;
                Ok(PopOutcome::Popped(tenant_id, task))
            }
            other => Err(Error::Serialization(format!("unexpected pop status: {:?}", other))),
        }
    }

    async fn size(&self, queue: &str) -> Result<u64> {
        let keys: Vec<RedisKey> = vec![self.keys.active(queue).into()];
        let args: Vec<RedisValue> = vec![self.keys.pending_prefix(queue).into()];
        let total = self.redis.eval(scripts::SIZE, keys, args).await?;
        total
            .as_u64()
            .ok_or_else(|| Error::Serialization(format!("unexpected size reply: {:?}", total)))
    }

    async fn release(&self, queue: &str, tenant_id: TenantId) -> Result<()> {
        let keys: Vec<RedisKey> = vec![self.keys.active(queue).into()];
        let args: Vec<RedisValue> = vec![tenant_id.to_string().into()];
        self.redis.eval(scripts::RELEASE, keys, args).await?;
        Ok(())
    }

    async fn active_tenants(&self, queue: &str) -> Result<Vec<(TenantId, i64)>> {
        let entries = self.redis.zrange_with_scores(self.keys.active(queue).into()).await?;
        entries
            .into_iter()
            .map(|(member, count)| {
                let tenant_id = member
                    .parse()
                    .map_err(|_| Error::Serialization(format!("invalid tenant in active registry: {}", member)))?;
                Ok((tenant_id, count as i64))
            })
            .collect()
    }

    async fn add_processing(
        &self,
        queue: &str,
        tenant_id: TenantId,
        fingerprint: &Fingerprint,
        deadline: f64,
    ) -> Result<bool> {
        self.redis
            .zadd_nx(
                self.keys.processing(queue, tenant_id).into(),
                fingerprint.as_str().into(),
                deadline,
            )
            .await
    }

    async fn remove_processing(&self, queue: &str, tenant_id: TenantId, fingerprint: &Fingerprint) -> Result<()> {
        self.redis
            .zrem(self.keys.processing(queue, tenant_id).into(), fingerprint.as_str().into())
            .await?;
        Ok(())
    }

    async fn expired_processing(&self, queue: &str, tenant_id: TenantId, now: f64) -> Result<Vec<Fingerprint>> {
        let members = self
            .redis
            .zrangebyscore_upto(self.keys.processing(queue, tenant_id).into(), now)
            .await?;
        Ok(members.into_iter().map(Fingerprint::from).collect())
    }

    async fn set_payload(&self, queue: &str, fingerprint: &Fingerprint, task: Vec<u8>) -> Result<()> {
        self.redis
            .set(self.keys.payload(queue, fingerprint).into(), RedisValue::Bytes(task.into()))
            .await
    }

    async fn get_payload(&self, queue: &str, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let value = self.redis.get(self.keys.payload(queue, fingerprint).into()).await?;
        Ok(value.and_then(into_bytes))
    }

    async fn delete_payload(&self, queue: &str, fingerprint: &Fingerprint) -> Result<()> {
        self.redis.del(vec![self.keys.payload(queue, fingerprint).into()]).await?;
        Ok(())
    }
}
