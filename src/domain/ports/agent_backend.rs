//! Downstream agent port.
//!
//! An [`AgentBackend`] builds [`AgentSession`]s: expensive, reusable
//! invocation handles bound to one conversational session and one
//! [`AgentKind`]. The relay caches sessions and disposes of them through
//! [`AgentSession::close`] once they are evicted and idle.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::InvocationError;
use crate::domain::models::{AgentKind, Turn};

/// What an agent session is constructed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentBinding {
    pub session_id: String,
    pub kind: AgentKind,
}

/// Per-call context handed to the agent.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub kind: AgentKind,
    /// Prior turns in this session, oldest first.
    pub history: Vec<Turn>,
}

/// Factory for agent sessions.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Construct a session handle. May be slow.
    async fn connect(&self, binding: &AgentBinding) -> Result<Box<dyn AgentSession>, InvocationError>;
}

/// A constructed, reusable invocation handle.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Run one prompt. `budget` is advisory; the caller enforces the deadline.
    async fn invoke(
        &self,
        prompt: &str,
        context: &SessionContext,
        budget: Duration,
    ) -> Result<String, InvocationError>;

    /// Release resources held by this handle. Called at most once.
    async fn close(&self) {}
}
