//! Mock agent backend for testing and local runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::domain::errors::InvocationError;
use crate::domain::ports::{AgentBackend, AgentBinding, AgentSession, SessionContext};

/// What a mock invocation produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Echo the prompt back, tagged with the agent type and turn count.
    Echo,
    /// Fixed text.
    Text(String),
    /// Fail with this error.
    Fail(InvocationError),
}

/// Mock response configuration.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Reply used when no scripted reply is queued
    pub reply: MockReply,
    /// Simulated invocation latency
    pub latency: Duration,
    /// Simulated construction latency
    pub connect_latency: Duration,
    /// Fail construction with this error
    pub connect_error: Option<InvocationError>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            reply: MockReply::Echo,
            latency: Duration::ZERO,
            connect_latency: Duration::ZERO,
            connect_error: None,
        }
    }
}

impl MockBehavior {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            reply: MockReply::Text(text.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            reply: MockReply::Fail(InvocationError::Invocation(message.into())),
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }
}

#[derive(Default)]
struct MockState {
    behavior: RwLock<MockBehavior>,
    script: Mutex<VecDeque<MockReply>>,
    connects: AtomicU64,
    invocations: AtomicU64,
    closes: AtomicU64,
}

/// Mock agent backend with scripted replies and call counters.
#[derive(Clone, Default)]
pub struct MockAgentBackend {
    state: Arc<MockState>,
}

impl MockAgentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            state: Arc::new(MockState {
                behavior: RwLock::new(behavior),
                ..Default::default()
            }),
        }
    }

    /// Replace the default behavior.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.state.behavior.write().await = behavior;
    }

    /// Queue replies consumed one per invocation before the default applies.
    pub async fn push_replies(&self, replies: impl IntoIterator<Item = MockReply>) {
        self.state.script.lock().await.extend(replies);
    }

    /// Number of sessions constructed.
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of invocations started.
    pub fn invocations(&self) -> u64 {
        self.state.invocations.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentBackend for MockAgentBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, _binding: &AgentBinding) -> Result<Box<dyn AgentSession>, InvocationError> {
        let behavior = self.state.behavior.read().await.clone();
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if !behavior.connect_latency.is_zero() {
            tokio::time::sleep(behavior.connect_latency).await;
        }
        if let Some(err) = behavior.connect_error {
            return Err(err);
        }

        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl AgentSession for MockSession {
    async fn invoke(
        &self,
        prompt: &str,
        context: &SessionContext,
        _budget: Duration,
    ) -> Result<String, InvocationError> {
        self.state.invocations.fetch_add(1, Ordering::SeqCst);
        let behavior = self.state.behavior.read().await.clone();
        let scripted = self.state.script.lock().await.pop_front();

        if !behavior.latency.is_zero() {
            tokio::time::sleep(behavior.latency).await;
        }

        match scripted.unwrap_or(behavior.reply) {
            MockReply::Echo => Ok(format!(
                "[{}] turn {}: {}",
                context.kind,
                context.history.len() / 2 + 1,
                prompt
            )),
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(err) => Err(err),
        }
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}
