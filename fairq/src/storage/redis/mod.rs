//! Redis client wrapper
//!
//! Provides type-safe Redis operation interfaces.

mod scripts;
mod store;

pub use store::RedisStore;

use crate::Result;
use fred::{
    interfaces::*,
    prelude::*,
    types::{RedisConfig as FredRedisConfig, ReconnectPolicy, SetOptions},
};
use std::sync::Arc;

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        }
    }
}

/// Redis client
#[derive(Clone)]
pub struct RedisClient {
    pool: Arc<RedisPool>,
}

impl RedisClient {
    /// Create a new Redis client
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let redis_config = FredRedisConfig::from_url(&config.url)?;
        let pool = RedisPool::new(
            redis_config,
            None,
            None,
            Some(ReconnectPolicy::default()),
            config.pool_size,
        )?;

        pool.init().await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create client from connection URL
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig {
            url: url.into(),
            ..Default::default()
        })
        .await
    }

    /// Get the underlying Redis connection pool
    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }

    /// Ping Redis
    pub async fn ping(&self) -> Result<String> {
        let result: String = self.pool.ping().await?;
        Ok(result)
    }

    /// Run a Lua script atomically on the server
    pub async fn eval(&self, script: &str, keys: Vec<RedisKey>, args: Vec<RedisValue>) -> Result<RedisValue> {
        let result: RedisValue = self.pool.next().eval(script, keys, args).await?;
        Ok(result)
    }

    /// Set Key-Value
    pub async fn set(&self, key: RedisKey, value: RedisValue) -> Result<()> {
        let _: () = self.pool.set(key, value, None, None, false).await?;
        Ok(())
    }

    /// Get Value
    pub async fn get(&self, key: RedisKey) -> Result<Option<RedisValue>> {
        let result: Option<RedisValue> = self.pool.get(key).await?;
        Ok(result)
    }

    /// Delete Key
    pub async fn del(&self, keys: Vec<RedisKey>) -> Result<usize> {
        let result: usize = self.pool.del(keys).await?;
        Ok(result)
    }

    /// Sorted Set operation: add only if the member is absent (ZADD NX)
    pub async fn zadd_nx(&self, key: RedisKey, member: RedisValue, score: f64) -> Result<bool> {
        let values: Vec<(f64, RedisValue)> = vec![(score, member)];
        let added: i64 = self
            .pool
            .zadd(key, Some(SetOptions::NX), None, false, false, values)
            .await?;
        Ok(added > 0)
    }

    /// Sorted Set operation: get the whole set with scores, lowest first
    pub async fn zrange_with_scores(&self, key: RedisKey) -> Result<Vec<(String, f64)>> {
        let result: Vec<RedisValue> = self
            .pool
            .zrange(key, 0, -1, None, false, None, true)
            .await?;
        // Result comes as alternating member, score, member, score, ...
        let mut output = Vec::new();
        for chunk in result.chunks(2) {
            if chunk.len() == 2 {
                let member = chunk[0].as_string();
                let score = chunk[1].as_f64();
                if let (Some(m), Some(s)) = (member, score) {
                    output.push((m, s));
                }
            }
        }
        Ok(output)
    }

    /// Sorted Set operation: members with a score at or below `max`
    pub async fn zrangebyscore_upto(&self, key: RedisKey, max: f64) -> Result<Vec<String>> {
        let result: Vec<RedisValue> = self
            .pool
            .zrangebyscore(key, "-inf", max, false, None)
            .await?;
        Ok(result.into_iter().filter_map(|v| v.as_string()).collect())
    }

    /// Sorted Set operation: remove
    pub async fn zrem(&self, key: RedisKey, member: RedisValue) -> Result<bool> {
        let result: u64 = self.pool.zrem(key, member).await?;
        Ok(result > 0)
    }
}
