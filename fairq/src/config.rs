//! Queue engine configuration
//!
//! Provides the settings shared by every queue operation: key naming,
//! payload limits and the redelivery backoff schedule.

use crate::{Error, Result};
use std::time::Duration;

/// Default Redis key prefix
pub const DEFAULT_KEY_PREFIX: &str = "fairq";

/// Queue engine configuration
///
/// Contains the settings for task encoding, key layout and redelivery backoff.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Prefix prepended to every store key (default: "fairq")
    pub key_prefix: String,

    /// Maximum payload size in bytes (default: 512KB)
    pub max_payload_size: usize,

    /// Delay applied to the first redelivery (default: 1 second)
    pub backoff_base: Duration,

    /// Upper bound for the redelivery delay (default: 5 minutes)
    pub backoff_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_payload_size: 512 * 1024, // 512KB
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5 * 60),
        }
    }
}

impl QueueConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set maximum payload size
    #[must_use]
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the backoff schedule
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("key_prefix cannot be empty".into()));
        }
        if self.max_payload_size == 0 {
            return Err(Error::Config("max_payload_size must be greater than 0".into()));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::Config("backoff_base must be greater than 0".into()));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::Config(format!(
                "backoff_max ({:?}) must not be below backoff_base ({:?})",
                self.backoff_max, self.backoff_base
            )));
        }
        Ok(())
    }

    /// Redelivery delay for a task that has failed `error_count` times
    ///
    /// `base * 2^(error_count - 1)`, saturating at `backoff_max`. A count of
    /// zero is treated like the first failure.
    pub fn backoff(&self, error_count: u32) -> Duration {
        let exponent = error_count.saturating_sub(1);
        let factor = match 2u32.checked_pow(exponent) {
            Some(f) => f,
            None => return self.backoff_max,
        };
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.key_prefix, "fairq");
        assert_eq!(config.max_payload_size, 512 * 1024);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::new()
            .with_key_prefix("mail")
            .with_max_payload_size(1024)
            .with_backoff(Duration::from_millis(500), Duration::from_secs(10));

        assert_eq!(config.key_prefix, "mail");
        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.backoff_base, Duration::from_millis(500));
        assert_eq!(config.backoff_max, Duration::from_secs(10));
    }

    #[test]
    fn test_validate() {
        assert!(QueueConfig::new().with_key_prefix("").validate().is_err());
        assert!(QueueConfig::new().with_max_payload_size(0).validate().is_err());
        assert!(QueueConfig::new()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_backoff_schedule() {
        let config = QueueConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(4), Duration::from_secs(8));
        assert_eq!(config.backoff(9), Duration::from_secs(256));
        assert_eq!(config.backoff(10), Duration::from_secs(300));
        assert_eq!(config.backoff(64), Duration::from_secs(300));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_zero_count() {
        assert_eq!(QueueConfig::default().backoff(0), Duration::from_secs(1));
    }
}
