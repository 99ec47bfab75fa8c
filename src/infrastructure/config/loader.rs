use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{RelayConfig, StorageKind};

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "agent-relay.yaml";

/// Prefix for environment overrides; nested keys are split on `__`.
pub const ENV_PREFIX: &str = "AGENT_RELAY_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {0}: must be at least 1")]
    MustBePositive(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("storage.url is required for the object_store backend")]
    MissingStorageUrl,

    #[error("Storage path cannot be empty")]
    EmptyStoragePath,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `agent-relay.yaml` in the working directory
    /// 3. Environment variables (`AGENT_RELAY_*`, highest priority)
    pub fn load() -> Result<RelayConfig> {
        Self::load_with(None)
    }

    /// Load with an explicit config file in place of `agent-relay.yaml`.
    pub fn load_with(path: Option<&Path>) -> Result<RelayConfig> {
        let source = path.map_or_else(|| DEFAULT_CONFIG_FILE.to_string(), |p| p.display().to_string());
        if let Some(path) = path {
            anyhow::ensure!(path.exists(), "Config file {} does not exist", path.display());
        }

        let config: RelayConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to extract configuration from {source}"))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// The layered provider stack, without extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.map_or_else(|| Path::new(DEFAULT_CONFIG_FILE).to_path_buf(), Path::to_path_buf);

        Figment::new()
            .merge(Serialized::defaults(RelayConfig::default()))
            .merge(Yaml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &RelayConfig) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 8] = [
            ("breaker.failure_threshold", config.breaker.failure_threshold.into()),
            ("breaker.recovery_timeout_secs", config.breaker.recovery_timeout_secs),
            ("breaker.required_successes", config.breaker.required_successes.into()),
            ("invocation_timeout_secs", config.invocation_timeout_secs),
            ("agent_cache_capacity", config.agent_cache_capacity),
            ("session_cache_capacity", config.session_cache_capacity),
            ("metrics_window_size", config.metrics_window_size as u64),
            ("max_message_length", config.max_message_length as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::MustBePositive(field));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        match config.storage.backend {
            StorageKind::File if config.storage.path.as_os_str().is_empty() => {
                return Err(ConfigError::EmptyStoragePath);
            }
            StorageKind::ObjectStore
                if config.storage.url.as_deref().map_or(true, |u| u.trim().is_empty()) =>
            {
                return Err(ConfigError::MissingStorageUrl);
            }
            _ => {}
        }

        if let Some(endpoint) = &config.agent.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::ValidationFailed(format!(
                    "agent.endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }

        Ok(())
    }
}
