//! # Engine configuration.
//!
//! [`EngineConfig`] carries the engine-wide settings (event bus capacity) and,
//! optionally, per-operation policies keyed by operation name. It is
//! deserializable from TOML so policies can live next to the rest of a
//! service's configuration.
//!
//! Durations are expressed in milliseconds. Every configured policy goes through
//! the same validated constructors as hand-built ones ([`RetryPolicy::new`],
//! [`ConcurrencyPolicy::new`]); loading fails fast on the first malformed policy.
//!
//! # Example
//! ```
//! use opvisor::{Composition, EngineConfig};
//!
//! let cfg = EngineConfig::from_toml_str(r#"
//!     bus_capacity = 256
//!
//!     [operations.fetch.retry]
//!     max_attempts = 4
//!     initial_delay_ms = 500
//!     multiplier = 2.0
//!     max_delay_ms = 5000
//!
//!     [operations.heavy.concurrency]
//!     max_concurrent = 2
//!
//!     [operations.critical]
//!     composition = "admit_per_attempt"
//!     retry = { max_attempts = 2, initial_delay_ms = 1000 }
//!     concurrency = { max_concurrent = 1 }
//! "#).unwrap();
//!
//! assert_eq!(cfg.bus_capacity, 256);
//! assert_eq!(cfg.operations["critical"].composition, Composition::AdmitPerAttempt);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{
    error::{ConfigError, InvalidPolicy},
    operations::OperationBinding,
    policies::{Composition, ConcurrencyPolicy, RetryPolicy},
};

/// Engine-wide configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Capacity of the event bus broadcast channel.
    ///
    /// Subscribers lagging more than `bus_capacity` events behind skip the oldest
    /// ones. Minimum value is 1 (enforced by the bus).
    pub bus_capacity: usize,

    /// Policies per operation key, used by
    /// [`EngineBuilder::register_configured`](crate::EngineBuilder::register_configured).
    pub operations: BTreeMap<String, OperationConfig>,
}

impl Default for EngineConfig {
    /// - `bus_capacity = 1024`
    /// - no configured operations
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            operations: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// ### Errors
    /// - [`ConfigError::Parse`] for malformed TOML or unknown fields;
    /// - [`ConfigError::InvalidPolicy`] for the first operation whose policy is invalid.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Checks every configured policy through the validated constructors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, op) in &self.operations {
            op.validate().map_err(|source| ConfigError::InvalidPolicy {
                key: key.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Policies of one operation key.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationConfig {
    /// Retry policy (`None` = single invocation).
    pub retry: Option<RetryConfig>,
    /// Concurrency policy (`None` = no admission gate).
    pub concurrency: Option<ConcurrencyConfig>,
    /// Nesting of admission and retry when both are set.
    pub composition: Composition,
}

impl OperationConfig {
    /// Attaches the configured policies to `binding`.
    ///
    /// ### Errors
    /// The first [`InvalidPolicy`] raised by a policy constructor.
    pub fn apply<I, V, E>(
        &self,
        binding: OperationBinding<I, V, E>,
    ) -> Result<OperationBinding<I, V, E>, InvalidPolicy>
    where
        E: 'static,
    {
        let mut binding = binding.with_composition(self.composition);
        if let Some(retry) = &self.retry {
            binding = binding.with_retry(retry.to_policy()?);
        }
        if let Some(concurrency) = &self.concurrency {
            binding = binding.with_concurrency(concurrency.to_policy()?);
        }
        Ok(binding)
    }

    fn validate(&self) -> Result<(), InvalidPolicy> {
        if let Some(retry) = &self.retry {
            retry.to_policy()?;
        }
        if let Some(concurrency) = &self.concurrency {
            concurrency.to_policy()?;
        }
        Ok(())
    }
}

/// Serialized form of a [`RetryPolicy`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the 2nd attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Clamp on any delay, in milliseconds. Defaults to `initial_delay_ms`
    /// for a fixed backoff, or unbounded when `multiplier > 1`.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    /// Same values as [`RetryPolicy::default`]: 3 attempts, 1s fixed delay.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 1.0,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    /// Builds the validated policy.
    pub fn to_policy(&self) -> Result<RetryPolicy, InvalidPolicy> {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let max = match self.max_delay_ms {
            Some(ms) => Duration::from_millis(ms),
            None if self.multiplier == 1.0 => initial,
            None => Duration::MAX,
        };
        RetryPolicy::new(self.max_attempts, initial, self.multiplier, max)
    }
}

/// Serialized form of a [`ConcurrencyPolicy`].
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Maximum simultaneous in-flight executions.
    pub max_concurrent: usize,
    /// Maximum waiting callers (absent = unbounded).
    #[serde(default)]
    pub queue_limit: Option<usize>,
}

impl ConcurrencyConfig {
    /// Builds the validated policy.
    pub fn to_policy(&self) -> Result<ConcurrencyPolicy, InvalidPolicy> {
        let policy = ConcurrencyPolicy::new(self.max_concurrent)?;
        Ok(match self.queue_limit {
            Some(limit) => policy.with_queue_limit(limit),
            None => policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.bus_capacity, 1024);
        assert!(cfg.operations.is_empty());

        let retry = RetryConfig::default().to_policy().unwrap();
        assert_eq!(retry, RetryPolicy::default());
    }

    #[test]
    fn test_bus_capacity_clamped() {
        let cfg = EngineConfig {
            bus_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn test_parses_policies() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [operations.save.retry]
            max_attempts = 3
            initial_delay_ms = 1000

            [operations.fetch.retry]
            max_attempts = 4
            initial_delay_ms = 500
            multiplier = 2.0
            max_delay_ms = 5000

            [operations.heavy.concurrency]
            max_concurrent = 2
            queue_limit = 16
            "#,
        )
        .unwrap();

        let save = cfg.operations["save"].retry.as_ref().unwrap().to_policy().unwrap();
        assert_eq!(save, RetryPolicy::fixed(3, Duration::from_secs(1)).unwrap());

        let fetch = cfg.operations["fetch"].retry.as_ref().unwrap().to_policy().unwrap();
        assert_eq!(fetch.delay(3), Duration::from_secs(1));
        assert_eq!(fetch.max_delay(), Duration::from_secs(5));

        let heavy = cfg.operations["heavy"].concurrency.as_ref().unwrap().to_policy().unwrap();
        assert_eq!(heavy.max_concurrent(), 2);
        assert_eq!(heavy.queue_limit(), Some(16));
        assert_eq!(cfg.operations["heavy"].composition, Composition::AdmitOnce);
    }

    #[test]
    fn test_invalid_policy_fails_fast() {
        let err = EngineConfig::from_toml_str(
            r#"
            [operations.broken.retry]
            max_attempts = 3
            initial_delay_ms = 100
            multiplier = 0.5
            "#,
        )
        .unwrap_err();
        assert_eq!(err.as_label(), "config_invalid_policy");
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [operations.heavy.concurrency]
            max_concurrent = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPolicy { source: InvalidPolicy::MaxConcurrent { got: 0, .. }, .. }
        ));
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let err = EngineConfig::from_toml_str("bus_capacty = 12").unwrap_err();
        assert_eq!(err.as_label(), "config_parse");
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.as_label(), "config_io");
    }
}
