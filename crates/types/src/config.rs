//! Runtime configuration for the node core.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Errors from configuration validation.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[snafu(display("Invalid configuration: {message}"))]
    Validation {
        /// Description of the invalid value.
        message: String,
    },
}

/// Global policy ordering in-memory effects against durable writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EffectOrder {
    /// Events are durable before their effects become visible. Writes
    /// suspend the node's message processing until the persistor confirms.
    PersistorFirst,
    /// Effects become visible immediately; durability is achieved by an
    /// unbounded background retry. Writes never suspend the node.
    MemoryFirst,
}

/// Default effect order.
fn default_effect_order() -> EffectOrder {
    EffectOrder::MemoryFirst
}

/// Default base backoff for persistence retries (milliseconds).
fn default_base_backoff_ms() -> u64 {
    1
}

/// Default backoff cap for persistence retries (milliseconds).
fn default_max_backoff_ms() -> u64 {
    10_000
}

/// Default backoff multiplier.
fn default_multiplier() -> f64 {
    2.0
}

/// Default jitter factor.
fn default_jitter() -> f64 {
    0.10
}

/// Backoff policy for the per-node persistence write lane.
///
/// MemoryFirst writes retry with this policy forever; the backoff doubles
/// per attempt up to the cap, with ±`jitter` randomness to avoid retry
/// alignment across nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersistRetryConfig {
    /// Backoff before the first retry, in milliseconds.
    ///
    /// Must be > 0.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Maximum backoff between retries, in milliseconds.
    ///
    /// Must be >= `base_backoff_ms`.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Multiplier applied to the backoff after each failed attempt.
    ///
    /// Must be >= 1.0.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0) randomizing each backoff by ±factor.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl PersistRetryConfig {
    /// Backoff before the first retry.
    #[must_use]
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Maximum backoff between retries.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_backoff_ms == 0 {
            return Err(ConfigError::Validation {
                message: "base_backoff_ms must be > 0".to_string(),
            });
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(ConfigError::Validation {
                message: "max_backoff_ms must be >= base_backoff_ms".to_string(),
            });
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::Validation {
                message: "multiplier must be >= 1.0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Validation {
                message: "jitter must be within [0.0, 1.0]".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PersistRetryConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Node-core configuration shared by every node of a graph.
///
/// # Example
///
/// ```
/// # use strandgraph_types::config::{EffectOrder, GraphConfig};
/// let config = GraphConfig::builder()
///     .effect_order(EffectOrder::PersistorFirst)
///     .snapshot_on_update(true)
///     .build()
///     .expect("valid graph config");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphConfig {
    /// Ordering of in-memory effects against durable writes.
    #[serde(default = "default_effect_order")]
    pub effect_order: EffectOrder,
    /// Write a snapshot after every effective update.
    #[serde(default)]
    pub snapshot_on_update: bool,
    /// Store only the latest snapshot per node, keyed at the maximum
    /// event time, instead of one snapshot per creation time.
    #[serde(default = "default_true")]
    pub snapshot_singleton: bool,
    /// Backoff policy for the persistence write lane.
    #[serde(default)]
    pub retry: PersistRetryConfig,
}

/// Serde default helper.
fn default_true() -> bool {
    true
}

#[bon::bon]
impl GraphConfig {
    /// Creates a new graph configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the retry policy is invalid.
    #[builder]
    pub fn new(
        #[builder(default = default_effect_order())] effect_order: EffectOrder,
        #[builder(default)] snapshot_on_update: bool,
        #[builder(default = default_true())] snapshot_singleton: bool,
        #[builder(default)] retry: PersistRetryConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { effect_order, snapshot_on_update, snapshot_singleton, retry };
        config.validate()?;
        Ok(config)
    }
}

impl GraphConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            effect_order: default_effect_order(),
            snapshot_on_update: false,
            snapshot_singleton: true,
            retry: PersistRetryConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GraphConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_invalid_retry() {
        let retry = PersistRetryConfig { base_backoff_ms: 0, ..Default::default() };
        let result = GraphConfig::builder().retry(retry).build();
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_retry_validation_bounds() {
        let mut retry = PersistRetryConfig::default();
        assert!(retry.validate().is_ok());

        retry.jitter = 1.5;
        assert!(retry.validate().is_err());

        retry.jitter = 0.1;
        retry.multiplier = 0.5;
        assert!(retry.validate().is_err());

        retry.multiplier = 2.0;
        retry.max_backoff_ms = 0;
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: GraphConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.effect_order, EffectOrder::MemoryFirst);
        assert!(config.snapshot_singleton);
        assert!(!config.snapshot_on_update);
        assert_eq!(config.retry.base_backoff_ms, 1);
        assert_eq!(config.retry.max_backoff_ms, 10_000);
    }

    #[test]
    fn test_effect_order_wire_format() {
        let json = serde_json::to_string(&EffectOrder::PersistorFirst).unwrap();
        assert_eq!(json, "\"persistor_first\"");
    }
}
