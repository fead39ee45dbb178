//! Task type definitions
//!
//! Provides the Task wire record, enqueue priorities and the fingerprint used
//! to name durable processing entries.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Tenant identifier (an organization, customer, ...)
pub type TenantId = i64;

/// Enqueue priority
///
/// Priorities are applied as an offset, in seconds, to the enqueue timestamp
/// that forms a task's score. The offsets are far larger than any realistic
/// queueing delay, so priority always dominates enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Popped before anything at default or low priority
    High,
    /// Normal priority
    #[default]
    Default,
    /// Popped only after everything else
    Low,
}

impl Priority {
    /// Score offset in seconds
    pub fn offset(&self) -> f64 {
        match self {
            Priority::High => -10_000_000.0,
            Priority::Default => 0.0,
            Priority::Low => 10_000_000.0,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Default => write!(f, "default"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "default" => Ok(Priority::Default),
            "low" => Ok(Priority::Low),
            other => Err(Error::Validation(format!("unknown priority: {}", other))),
        }
    }
}

/// Task struct
///
/// Serialized as a MessagePack map so the record is self-describing:
/// `type`, `tenant_id`, `task`, `queued_on` and, when non-zero, `error_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task type (for routing to handlers)
    #[serde(rename = "type")]
    pub task_type: String,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Opaque task payload
    #[serde(rename = "task")]
    pub payload: Vec<u8>,

    /// Time the task was created by its producer
    pub queued_on: DateTime<Utc>,

    /// Number of times the task has been redelivered
    #[serde(default, skip_serializing_if = "is_zero")]
    pub error_count: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Task {
    /// Create a new task queued now
    pub fn new(task_type: impl Into<String>, tenant_id: TenantId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_type: task_type.into(),
            tenant_id,
            payload: payload.into(),
            queued_on: Utc::now(),
            error_count: 0,
        }
    }

    /// Serialize a typed value into a task payload
    pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Deserialize the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(rmp_serde::from_slice(&self.payload)?)
    }

    /// Serialize the task into its wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize a task from its wire form
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Fingerprint naming this task's durable processing entry
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.task_type, self.tenant_id, &self.payload)
    }

    /// Get task description
    pub fn description(&self) -> String {
        format!(
            "Task[type={}, tenant={}, errors={}]",
            self.task_type, self.tenant_id, self.error_count
        )
    }
}

/// Handle to a durable processing entry
///
/// Hex SHA-256 over the task type, tenant and payload. Two tasks with the same
/// triple share a fingerprint and are treated as the same logical task. The
/// empty fingerprint is a valid "nothing to clean up" handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a task triple
    pub fn of(task_type: &str, tenant_id: TenantId, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(task_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(tenant_id.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(payload);
        Self(hex::encode(hasher.finalize()))
    }

    /// Check if this is the empty handle
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the fingerprint as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
