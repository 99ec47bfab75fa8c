//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

#![allow(dead_code)]

use agent_relay::adapters::agents::MockAgentBackend;
use agent_relay::domain::errors::StorageError;
use agent_relay::domain::models::{RelayConfig, SessionState};
use agent_relay::domain::ports::StorageBackend;
use agent_relay::infrastructure::setup;
use agent_relay::Dispatcher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory storage backend with failure injection.
#[derive(Default)]
pub struct MemoryStorage {
    sessions: Mutex<HashMap<String, SessionState>>,
    loads: AtomicU64,
    saves: AtomicU64,
    pub fail_loads: AtomicBool,
    pub fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn stored(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(session_id).cloned()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StorageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("graph store unreachable".into()));
        }
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("graph store unreachable".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        self.sessions.lock().await.remove(session_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("graph store unreachable".into()));
        }
        Ok(())
    }
}

/// An isolated relay over in-memory storage and a mock agent.
pub struct TestRelay {
    pub dispatcher: Dispatcher,
    pub storage: Arc<MemoryStorage>,
    pub agent: MockAgentBackend,
}

/// Build an isolated relay with the given configuration.
pub fn relay(config: &RelayConfig, agent: MockAgentBackend) -> TestRelay {
    let storage = Arc::new(MemoryStorage::default());
    let dispatcher = setup::build_dispatcher_with(config, storage.clone(), Arc::new(agent.clone()));
    TestRelay {
        dispatcher,
        storage,
        agent,
    }
}

/// Default configuration with a few fields tightened for tests.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.invocation_timeout_secs = 2;
    config
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for a condition to be true with timeout
///
/// Polls the predicate every 10ms until it returns true or timeout is reached.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
