use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::agent::AgentKind;

/// Main configuration structure for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Circuit breaker tuning
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Per-invocation timeout in seconds
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Maximum number of cached agent handles
    #[serde(default = "default_agent_cache_capacity")]
    pub agent_cache_capacity: u64,

    /// Maximum number of cached session storage handles
    #[serde(default = "default_session_cache_capacity")]
    pub session_cache_capacity: u64,

    /// Number of latency samples retained for percentile queries
    #[serde(default = "default_metrics_window_size")]
    pub metrics_window_size: usize,

    /// Longest accepted message, in characters after sanitizing
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Attach error internals to error envelopes
    #[serde(default)]
    pub debug: bool,

    /// Shared secret required in `X-Api-Key`; auth is off when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// Agent type used when a request names none
    #[serde(default)]
    pub default_agent_type: AgentKind,

    /// Session storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Downstream agent service
    #[serde(default)]
    pub agent: AgentServiceConfig,

    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_invocation_timeout_secs() -> u64 {
    30
}

const fn default_agent_cache_capacity() -> u64 {
    100
}

const fn default_session_cache_capacity() -> u64 {
    1000
}

const fn default_metrics_window_size() -> usize {
    1000
}

const fn default_max_message_length() -> usize {
    10_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            agent_cache_capacity: default_agent_cache_capacity(),
            session_cache_capacity: default_session_cache_capacity(),
            metrics_window_size: default_metrics_window_size(),
            max_message_length: default_max_message_length(),
            debug: false,
            api_key: None,
            default_agent_type: AgentKind::default(),
            storage: StorageConfig::default(),
            agent: AgentServiceConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before admitting a probe
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Successful probes needed to close again
    #[serde(default = "default_required_successes")]
    pub required_successes: u32,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_secs() -> u64 {
    60
}

const fn default_required_successes() -> u32 {
    3
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            required_successes: default_required_successes(),
        }
    }
}

/// Which session storage backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    ObjectStore,
}

/// Session storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    /// Root directory for the file backend
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Base URL for the object-store backend
    #[serde(default)]
    pub url: Option<String>,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".agent-relay/sessions")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            path: default_storage_path(),
            url: None,
        }
    }
}

/// Downstream agent service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct AgentServiceConfig {
    /// Base URL of the agent service; the mock backend is used when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key sent to the agent service in `X-Api-Key`
    #[serde(default)]
    pub api_key: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}
