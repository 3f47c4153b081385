use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::core::errors::{FlowError, Result};

/// How retry attempts obtain a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPool {
    /// Retries compete with fresh invocations for the same permits
    Shared,
    /// Attempts after the first run on their own pool of `n` permits
    Dedicated(usize),
}

/// Engine configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of invocations running at once
    pub max_concurrency: usize,
    /// Clamp `max_concurrency` to the number of available CPUs instead of warning
    pub clamp_to_hardware: bool,
    /// Size of a separate worker pool for retry attempts (None = shared pool)
    pub dedicated_retry_slots: Option<usize>,
    /// Timeout applied to tasks that do not declare their own
    #[serde(with = "opt_millis")]
    pub default_timeout: Option<Duration>,
    /// Return a per-invocation status map instead of failing on the first error
    pub partial_results: bool,
    /// Log level used by [`crate::core::logging::init_from_config`]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get().max(1),
            clamp_to_hardware: false,
            dedicated_retry_slots: None,
            default_timeout: None,
            partial_results: false,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Load configuration from a YAML document. Missing keys take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(FlowError::configuration(
                "max_concurrency must be greater than 0",
            ));
        }
        if self.dedicated_retry_slots == Some(0) {
            return Err(FlowError::configuration(
                "dedicated_retry_slots must be greater than 0 when set",
            ));
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(FlowError::configuration(
                "default_timeout must be greater than 0 when set",
            ));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(FlowError::configuration(format!(
                "unknown log_level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Worker pool size after applying the hardware policy
    pub fn effective_concurrency(&self) -> usize {
        let cpus = num_cpus::get().max(1);
        if self.max_concurrency > cpus {
            if self.clamp_to_hardware {
                return cpus;
            }
            warn!(
                max_concurrency = self.max_concurrency,
                cpus, "worker pool is larger than available hardware concurrency"
            );
        }
        self.max_concurrency
    }

    pub fn retry_pool(&self) -> RetryPool {
        match self.dedicated_retry_slots {
            Some(n) => RetryPool::Dedicated(n),
            None => RetryPool::Shared,
        }
    }
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    pub fn clamp_to_hardware(mut self, clamp: bool) -> Self {
        self.config.clamp_to_hardware = clamp;
        self
    }

    /// Give retry attempts their own pool of `slots` permits
    pub fn dedicated_retry_slots(mut self, slots: usize) -> Self {
        self.config.dedicated_retry_slots = Some(slots);
        self
    }

    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn partial_results(mut self, enabled: bool) -> Self {
        self.config.partial_results = enabled;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serde helper: `Option<Duration>` as whole milliseconds.
mod opt_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
