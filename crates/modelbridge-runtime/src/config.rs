//! Configuration for the bridge runtime.

use std::path::Path;

use modelbridge_core::Device;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BridgeConfig {
    /// Worker runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// `EnvFilter` directive for [`crate::logging::init`].
    #[serde(default)]
    pub log_filter: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Async worker threads driving task futures.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Upper bound on native calls running at once.
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_blocking_threads: default_max_blocking_threads(),
            thread_name: default_thread_name(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// Device override ("cpu", "cuda", "cuda:N"). Unset uses the engine default.
    #[serde(default)]
    pub device: Option<String>,

    /// Serialize evaluations per model even when the engine allows concurrent
    /// forward passes.
    #[serde(default)]
    pub serialize_evaluations: bool,
}

fn default_worker_threads() -> usize {
    2
}

fn default_max_blocking_threads() -> usize {
    4
}

fn default_thread_name() -> String {
    "modelbridge-worker".to_string()
}

impl BridgeConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.worker_threads == 0 {
            return Err(ConfigError::invalid("runtime.worker_threads must be at least 1"));
        }
        if self.runtime.max_blocking_threads == 0 {
            return Err(ConfigError::invalid(
                "runtime.max_blocking_threads must be at least 1",
            ));
        }
        self.device_override()?;
        Ok(())
    }

    pub fn device_override(&self) -> Result<Option<Device>, ConfigError> {
        self.engine
            .device
            .as_deref()
            .map(|raw| {
                raw.parse::<Device>()
                    .map_err(|e| ConfigError::invalid(format!("engine.device: {e}")))
            })
            .transpose()
    }
}
