//! Redis Key manager
//!
//! Provides unified Redis key naming convention.
//!
//! Every key of a queue carries the queue name as a `{hash tag}`, so all keys
//! touched by one script land in the same cluster slot.

use crate::config::DEFAULT_KEY_PREFIX;
use crate::task::{Fingerprint, TenantId};

/// Redis Key manager
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl Keys {
    /// Create a key manager with the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Pending set of one tenant (ZSet: task -> score)
    /// Example: fairq:{batch}:pending:42
    pub fn pending(&self, queue: &str, tenant_id: TenantId) -> String {
        format!("{}{}", self.pending_prefix(queue), tenant_id)
    }

    /// Pending set key without the tenant id, used by scripts that pick the
    /// tenant server-side
    /// Example: fairq:{batch}:pending:
    pub fn pending_prefix(&self, queue: &str) -> String {
        format!("{}:{{{}}}:pending:", self.prefix, queue)
    }

    /// Active registry of a queue (ZSet: tenant -> in-flight count)
    /// Example: fairq:{batch}:active
    pub fn active(&self, queue: &str) -> String {
        format!("{}:{{{}}}:active", self.prefix, queue)
    }

    /// Processing set of one tenant (ZSet: fingerprint -> deadline)
    /// Example: fairq:{batch}:processing:42
    pub fn processing(&self, queue: &str, tenant_id: TenantId) -> String {
        format!("{}:{{{}}}:processing:{}", self.prefix, queue, tenant_id)
    }

    /// Stored task for a durable processing entry (String)
    /// Example: fairq:{batch}:payload:9f86d0...
    pub fn payload(&self, queue: &str, fingerprint: &Fingerprint) -> String {
        format!("{}:{{{}}}:payload:{}", self.prefix, queue, fingerprint)
    }
}
