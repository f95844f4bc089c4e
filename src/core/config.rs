use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Worker configuration, loadable from TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Node name used for the middleware session and thread names
    pub node_name: String,
    /// Publish loop tick interval in milliseconds
    pub publish_interval_ms: u64,
    /// Text placed before the tick counter in every published message
    pub message_prefix: String,
    /// Upper bound for the master reachability probe in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            node_name: "chatter".to_string(),
            publish_interval_ms: 100,
            message_prefix: "hello world -- ".to_string(),
            connect_timeout_ms: 2000,
        }
    }
}

impl WorkerConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).context("invalid worker configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in config file {}", path.display()))
    }

    /// Convert to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            bail!("node_name must not be empty");
        }
        if self.publish_interval_ms == 0 {
            bail!("publish_interval_ms must be greater than zero");
        }
        if self.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
