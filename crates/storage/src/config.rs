//! Configuration for stores and the patch engine.
//!
//! [`StoreConfig`] can be built in code through its builder or deserialized
//! from a service's configuration file. Durations use humantime notation
//! (`"50ms"`, `"2s"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of retries after the first patch attempt.
pub const DEFAULT_MAX_PATCH_RETRIES: u32 = 5;

/// Upper bound on the configurable patch retry budget.
pub const MAX_PATCH_RETRIES: u32 = 100;

/// Default base delay between patch retries (none).
pub const DEFAULT_PATCH_BASE_DELAY: Duration = Duration::ZERO;

/// Default average latency simulated by the in-memory backend (none).
pub const DEFAULT_SIMULATED_LATENCY: Duration = Duration::ZERO;

/// Retry behaviour of the optimistic patch engine.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// Retries allowed after the initial attempt before giving up.
    #[serde(default = "default_max_retries")]
    #[builder(default = DEFAULT_MAX_PATCH_RETRIES)]
    pub max_retries: u32,

    /// Base delay before a retry. Each retry waits between one and two
    /// times this value; zero retries immediately.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    #[builder(default = DEFAULT_PATCH_BASE_DELAY)]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_PATCH_RETRIES
}

fn default_base_delay() -> Duration {
    DEFAULT_PATCH_BASE_DELAY
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_PATCH_RETRIES, base_delay: DEFAULT_PATCH_BASE_DELAY }
    }
}

impl PatchConfig {
    /// Total attempts the engine makes before reporting exhaustion.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Store-level configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use kvstash_storage::{PatchConfig, StoreConfig};
///
/// let config = StoreConfig::builder()
///     .patch(PatchConfig::builder().max_retries(3).build())
///     .simulated_latency(Duration::from_millis(5))
///     .build()?;
/// assert_eq!(config.patch().max_attempts(), 4);
/// # Ok::<(), kvstash_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Patch engine retry behaviour.
    #[serde(default)]
    pub(crate) patch: PatchConfig,

    /// Average artificial delay per in-memory backend call.
    #[serde(with = "humantime_serde", default = "default_simulated_latency")]
    pub(crate) simulated_latency: Duration,
}

fn default_simulated_latency() -> Duration {
    DEFAULT_SIMULATED_LATENCY
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { patch: PatchConfig::default(), simulated_latency: DEFAULT_SIMULATED_LATENCY }
    }
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AboveMaximum`] if `patch.max_retries` exceeds
    /// [`MAX_PATCH_RETRIES`].
    #[builder]
    pub fn new(
        #[builder(default)] patch: PatchConfig,
        #[builder(default = DEFAULT_SIMULATED_LATENCY)] simulated_latency: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { patch, simulated_latency };
        config.validate()?;
        Ok(config)
    }

    /// Validates a configuration, typically one produced by deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AboveMaximum`] if `patch.max_retries` exceeds
    /// [`MAX_PATCH_RETRIES`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patch.max_retries > MAX_PATCH_RETRIES {
            return Err(ConfigError::AboveMaximum {
                field: "patch.max_retries",
                value: u64::from(self.patch.max_retries),
                max: u64::from(MAX_PATCH_RETRIES),
            });
        }
        Ok(())
    }

    /// Returns the patch engine configuration.
    #[must_use]
    pub fn patch(&self) -> &PatchConfig {
        &self.patch
    }

    /// Returns the simulated backend latency.
    #[must_use]
    pub fn simulated_latency(&self) -> Duration {
        self.simulated_latency
    }
}
