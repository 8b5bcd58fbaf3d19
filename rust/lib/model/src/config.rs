//! Runtime configuration.
//!
//! Usually built in code with `RuntimeConfig::default()`, or read from a
//! TOML file:
//!
//! ```toml
//! namespace_separator = "/"
//! path_separator = "."
//! error_channel_capacity = 64
//! batch_timeout_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Separates namespace, key and action name in an action type.
    pub namespace_separator: String,

    /// Separates nested handler names in the action-name segment.
    pub path_separator: String,

    /// Buffer of the unhandled-error broadcast channel.
    pub error_channel_capacity: usize,

    /// Default deadline for `Runtime::batch` when the caller passes none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace_separator: "/".to_string(),
            path_separator: ".".to_string(),
            error_channel_capacity: 64,
            batch_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).map_err(|e| ModelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ModelError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace_separator.is_empty() {
            return Err(ModelError::Config("namespace_separator must not be empty".into()));
        }
        if self.path_separator.is_empty() {
            return Err(ModelError::Config("path_separator must not be empty".into()));
        }
        if self.namespace_separator == self.path_separator {
            return Err(ModelError::Config(format!(
                "namespace_separator and path_separator must differ (both {:?})",
                self.namespace_separator
            )));
        }
        if self.error_channel_capacity == 0 {
            return Err(ModelError::Config("error_channel_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}
