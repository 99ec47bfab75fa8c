//! Relay wiring and initialization
//!
//! Builds the configured storage and agent backends, assembles the core
//! components into a [`Dispatcher`], and writes the default config file.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::agents::{HttpAgentBackend, HttpAgentConfig, MockAgentBackend};
use crate::adapters::storage::{FileStorage, ObjectStoreStorage};
use crate::domain::models::{AgentServiceConfig, RelayConfig, StorageConfig, StorageKind};
use crate::domain::ports::{AgentBackend, StorageBackend};
use crate::services::agent_cache::AgentCache;
use crate::services::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService};
use crate::services::dispatcher::{Dispatcher, DispatcherConfig};
use crate::services::metrics::MetricsCollector;
use crate::services::session_registry::SessionRegistry;

/// Default configuration template content
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Agent relay configuration
# Override settings by editing this file or setting environment variables
# with the AGENT_RELAY_ prefix. Nested keys are separated by "__".
#
# Example environment variables:
#   export AGENT_RELAY_INVOCATION_TIMEOUT_SECS=10
#   export AGENT_RELAY_BREAKER__FAILURE_THRESHOLD=3
#   export AGENT_RELAY_LOGGING__LEVEL=debug

# Circuit breaker guarding the agent service
breaker:
  failure_threshold: 5
  recovery_timeout_secs: 60
  required_successes: 3

# Per-invocation deadline
invocation_timeout_secs: 30

# Bounded caches (LRU)
agent_cache_capacity: 100
session_cache_capacity: 1000

# Latency samples kept for percentiles
metrics_window_size: 1000

# Longest accepted message, in characters
max_message_length: 10000

# Attach error internals to error responses
debug: false

# Require this value in X-Api-Key (unset disables auth)
# api_key: "change-me"

# chat or graph
default_agent_type: chat

storage:
  # file or object_store
  backend: file
  path: ".agent-relay/sessions"
  # url: "http://localhost:9000"

agent:
  # Agent service base URL; the built-in mock agent is used when unset
  # endpoint: "http://localhost:8000"
  # api_key: "agent-secret"

server:
  host: "127.0.0.1"
  port: 8080
  enable_cors: true

logging:
  # trace, debug, info, warn, error
  level: "info"
  # json or pretty
  format: "json"
  # log_dir: ".agent-relay/logs"
  # daily, hourly or never
  rotation: daily
"#;

/// Write the default config file. Existing files are kept unless `force`.
///
/// Returns whether the file was written.
pub fn create_config_file(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE).context("Failed to write config file")?;
    Ok(true)
}

/// Storage backend selected by configuration.
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend {
        StorageKind::File => Ok(Arc::new(FileStorage::new(&config.path))),
        StorageKind::ObjectStore => {
            let url = config
                .url
                .as_deref()
                .context("storage.url is required for the object_store backend")?;
            let storage = ObjectStoreStorage::new(url).context("Failed to create object store client")?;
            Ok(Arc::new(storage))
        }
    }
}

/// Agent backend selected by configuration; the mock when no endpoint is set.
pub fn build_agent_backend(config: &AgentServiceConfig) -> Result<Arc<dyn AgentBackend>> {
    match &config.endpoint {
        Some(endpoint) => {
            let backend = HttpAgentBackend::new(
                HttpAgentConfig::new(endpoint.clone()).with_api_key(config.api_key.clone()),
            )
            .context("Failed to create agent service client")?;
            Ok(Arc::new(backend))
        }
        None => {
            tracing::warn!("No agent.endpoint configured, using the mock agent backend");
            Ok(Arc::new(MockAgentBackend::new()))
        }
    }
}

/// Assemble a dispatcher over explicit backends.
pub fn build_dispatcher_with(
    config: &RelayConfig,
    storage: Arc<dyn StorageBackend>,
    agents: Arc<dyn AgentBackend>,
) -> Dispatcher {
    Dispatcher::new(
        Arc::new(SessionRegistry::new(storage, config.session_cache_capacity)),
        Arc::new(AgentCache::new(agents, config.agent_cache_capacity)),
        Arc::new(CircuitBreakerService::new(CircuitBreakerConfig::from(&config.breaker))),
        Arc::new(MetricsCollector::new(config.metrics_window_size)),
        DispatcherConfig::from(config),
    )
}

/// Assemble a dispatcher with the configured backends.
pub fn build_dispatcher(config: &RelayConfig) -> Result<Dispatcher> {
    let storage = build_storage(&config.storage)?;
    let agents = build_agent_backend(&config.agent)?;

    tracing::info!(
        storage = storage.name(),
        agent_backend = agents.name(),
        agent_cache_capacity = config.agent_cache_capacity,
        session_cache_capacity = config.session_cache_capacity,
        "Relay components assembled"
    );
    Ok(build_dispatcher_with(config, storage, agents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigLoader;

    #[test]
    fn test_template_is_valid_config() {
        let config: RelayConfig = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        ConfigLoader::validate(&config).unwrap();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.agent.endpoint.is_none());
    }

    #[test]
    fn test_create_config_file_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/agent-relay.yaml");

        assert!(create_config_file(&path, false).unwrap());
        fs::write(&path, "debug: true\n").unwrap();
        assert!(!create_config_file(&path, false).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "debug: true\n");

        assert!(create_config_file(&path, true).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG_TEMPLATE);
    }

    #[test]
    fn test_backend_selection() {
        let mut storage = StorageConfig::default();
        assert_eq!(build_storage(&storage).unwrap().name(), "file");

        storage.backend = StorageKind::ObjectStore;
        assert!(build_storage(&storage).is_err());
        storage.url = Some("http://store.local".to_string());
        assert_eq!(build_storage(&storage).unwrap().name(), "object_store");

        let mut agent = AgentServiceConfig::default();
        assert_eq!(build_agent_backend(&agent).unwrap().name(), "mock");
        agent.endpoint = Some("http://agents.local".to_string());
        assert_eq!(build_agent_backend(&agent).unwrap().name(), "http");
    }

    #[tokio::test]
    async fn test_build_dispatcher_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RelayConfig::default();
        config.storage.path = dir.path().to_path_buf();
        config.breaker.failure_threshold = 2;

        let dispatcher = build_dispatcher(&config).unwrap();
        assert_eq!(dispatcher.breaker().config().failure_threshold, 2);
        assert_eq!(dispatcher.agents().capacity(), 100);
    }
}
