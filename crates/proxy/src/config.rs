//! Configuration of the data plane.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```
//! use micro_proxy::config::ProxyCoreConfig;
//!
//! let config = ProxyCoreConfig::from_json(r#"{ "content": { "inactivity_timeout_ms": 5000 } }"#).unwrap();
//! assert_eq!(config.content.inactivity_timeout_ms, 5000);
//! assert_eq!(config.content.high_water_mark, 16);
//! assert_eq!(config.metrics.prefix, "proxy");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ensure;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyCoreConfig {
    pub content: ContentConfig,
    pub metrics: MetricsConfig,
}

/// Flow control for message bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Buffered chunk count at which transport reads are paused
    pub high_water_mark: usize,
    /// Buffered chunk count at which paused transport reads resume. The mark is inclusive:
    /// reads resume as soon as the buffer holds this many chunks or fewer.
    pub low_water_mark: usize,
    /// How long a body may wait for its consumer after the last transport activity
    pub inactivity_timeout_ms: u64,
}

impl ContentConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self { high_water_mark: 16, low_water_mark: 4, inactivity_timeout_ms: 60_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prepended to the names of request statistics
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { prefix: "proxy".to_string() }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid water marks: high {high} must be positive and above low {low}")]
    InvalidWaterMarks { high: usize, low: usize },

    #[error("inactivity timeout must be positive")]
    ZeroInactivityTimeout,

    #[error("invalid config: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid_water_marks(high: usize, low: usize) -> Self {
        Self::InvalidWaterMarks { high, low }
    }
}

impl ProxyCoreConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ProxyCoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let content = &self.content;
        ensure!(content.high_water_mark > 0, ConfigError::invalid_water_marks(content.high_water_mark, content.low_water_mark));
        ensure!(
            content.low_water_mark < content.high_water_mark,
            ConfigError::invalid_water_marks(content.high_water_mark, content.low_water_mark)
        );
        ensure!(content.inactivity_timeout_ms > 0, ConfigError::ZeroInactivityTimeout);
        Ok(())
    }
}
