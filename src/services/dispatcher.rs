//! Request dispatch.
//!
//! The [`Dispatcher`] turns one raw chat request into either a normalized
//! [`ChatResponse`] or an [`ErrorEnvelope`]:
//!
//! 1. authenticate and sanitize the request, resolve the agent type
//! 2. resolve the session id
//! 3. ask the circuit breaker for admission
//! 4. bind the session's storage handle and a leased agent handle
//! 5. invoke the agent under a deadline, aborting it when the deadline wins
//! 6. report the outcome to the breaker exactly once
//! 7. persist the exchange, record one metrics sample, log
//!
//! Nothing here holds the breaker or metrics locks across the downstream
//! call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::errors::{DispatchError, DispatchResult, ErrorEnvelope, InvocationError};
use crate::domain::models::{is_valid_session_id, AgentKind, RelayConfig};
use crate::domain::ports::{AgentBinding, SessionContext};
use crate::services::agent_cache::{AgentCache, InvocationLease};
use crate::services::circuit_breaker::{CircuitBreakerService, CircuitCheckResult, CircuitStats};
use crate::services::health::{BreakerHealth, ComponentHealth, HealthReport};
use crate::services::metrics::{MetricsCollector, MetricsSnapshot, Outcome};
use crate::services::session_registry::SessionRegistry;

/// Inbound chat request, already lifted off the transport.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub message: String,
    pub agent_type: Option<String>,
    pub session_id: Option<String>,
    pub api_key: Option<String>,
}

impl RawRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Normalized successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    pub agent_type: AgentKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Metrics endpoint payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub circuit_breaker: CircuitStats,
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Expected `X-Api-Key`; `None` disables authentication.
    pub api_key: Option<String>,
    /// Maximum message length in characters, after sanitizing.
    pub max_message_length: usize,
    /// Deadline for one downstream invocation.
    pub invocation_timeout: Duration,
    pub default_agent_type: AgentKind,
    /// Attach error internals to envelopes.
    pub debug: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for DispatcherConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            max_message_length: config.max_message_length,
            invocation_timeout: config.invocation_timeout(),
            default_agent_type: config.default_agent_type,
            debug: config.debug,
        }
    }
}

/// Orchestrates session, breaker, cache and metrics for each request.
///
/// Owns no long-lived state of its own; cloning shares the components.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
    agents: Arc<AgentCache>,
    breaker: Arc<CircuitBreakerService>,
    metrics: Arc<MetricsCollector>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        agents: Arc<AgentCache>,
        breaker: Arc<CircuitBreakerService>,
        metrics: Arc<MetricsCollector>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            sessions,
            agents,
            breaker,
            metrics,
            config,
        }
    }

    /// Handle one chat request.
    ///
    /// Every call yields exactly one metrics sample and, on failure,
    /// exactly one envelope.
    pub async fn process(&self, request: RawRequest) -> Result<ChatResponse, ErrorEnvelope> {
        let started = Instant::now();
        let result = self.dispatch(request).await;
        let elapsed = started.elapsed();

        match result {
            Ok(response) => {
                self.metrics.record(elapsed, Outcome::Success);
                tracing::info!(
                    session_id = %response.session_id,
                    agent_type = %response.agent_type,
                    duration_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
                Ok(response)
            }
            Err(err) => {
                let kind = err.kind();
                // Rejections never reached downstream
                let duration = match &err {
                    DispatchError::CircuitOpen { .. } => Duration::ZERO,
                    _ => elapsed,
                };
                self.metrics.record(duration, Outcome::Error(kind));

                if kind.is_downstream() {
                    tracing::warn!(error_kind = %kind, duration_ms = elapsed.as_millis() as u64, error = %err, "Request failed");
                } else {
                    tracing::info!(error_kind = %kind, error = %err, "Request rejected");
                }
                Err(err.to_envelope(self.config.debug))
            }
        }
    }

    async fn dispatch(&self, request: RawRequest) -> DispatchResult<ChatResponse> {
        self.authenticate(request.api_key.as_deref())?;
        let message = sanitize_message(&request.message, self.config.max_message_length)?;
        let kind = match request.agent_type.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.parse::<AgentKind>().map_err(DispatchError::Validation)?,
            _ => self.config.default_agent_type,
        };

        let session_id = self.sessions.resolve(request.session_id.as_deref()).await?;

        let admission = self.breaker.check().await;
        if let CircuitCheckResult::Blocked { retry_after } = admission {
            return Err(DispatchError::CircuitOpen { retry_after });
        }

        // Runs detached so the breaker still learns the outcome if the
        // caller goes away mid-request.
        let this = self.clone();
        let id = session_id.clone();
        let admitted = tokio::spawn(async move { this.run_admitted(&id, kind, message, admission).await });
        let response = admitted
            .await
            .map_err(|err| DispatchError::Internal(format!("Dispatch task failed: {err}")))??;

        Ok(ChatResponse {
            success: true,
            response,
            agent_type: kind,
            session_id,
            timestamp: Utc::now(),
        })
    }

    async fn run_admitted(
        &self,
        session_id: &str,
        kind: AgentKind,
        message: String,
        admission: CircuitCheckResult,
    ) -> DispatchResult<String> {
        let result = self.invoke_downstream(session_id, kind, message).await;
        match &result {
            Ok(_) => self.breaker.record_success(&admission).await,
            Err(err) => self.breaker.record_failure(&admission, err.kind().as_str()).await,
        }
        result
    }

    async fn invoke_downstream(
        &self,
        session_id: &str,
        kind: AgentKind,
        message: String,
    ) -> DispatchResult<String> {
        let store = self.sessions.get_storage_handle(session_id).await?;
        let binding = AgentBinding {
            session_id: session_id.to_string(),
            kind,
        };
        let lease = self.agents.get_or_create(&binding).await?;
        let context = SessionContext {
            session_id: session_id.to_string(),
            kind,
            history: store.history().await,
        };

        let reply = self.invoke_with_deadline(lease, message.clone(), context).await?;

        if let Err(err) = store.record_exchange(&message, &reply).await {
            tracing::warn!(session_id, error = %err, "Failed to persist exchange");
        }
        Ok(reply)
    }

    /// Race the invocation against the deadline; abort it if the deadline wins.
    async fn invoke_with_deadline(
        &self,
        lease: InvocationLease,
        prompt: String,
        context: SessionContext,
    ) -> DispatchResult<String> {
        let budget = self.config.invocation_timeout;
        let mut task = tokio::spawn(async move { lease.invoke(&prompt, &context, budget).await });

        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_err)) => Err(DispatchError::Internal(format!(
                "Agent invocation task failed: {join_err}"
            ))),
            Err(_) => {
                task.abort();
                Err(InvocationError::Timeout(budget).into())
            }
        }
    }

    /// Check a client credential against the configured API key.
    pub fn authenticate(&self, supplied: Option<&str>) -> DispatchResult<()> {
        match (&self.config.api_key, supplied) {
            (None, _) => Ok(()),
            (Some(expected), Some(key)) if key == expected => Ok(()),
            (Some(_), Some(_)) => Err(DispatchError::Authentication("Invalid API key".to_string())),
            (Some(_), None) => Err(DispatchError::Authentication("Missing API key".to_string())),
        }
    }

    /// Metrics snapshot plus breaker state.
    pub async fn metrics_report(&self) -> MetricsReport {
        MetricsReport {
            metrics: self.metrics.snapshot(),
            circuit_breaker: self.breaker.stats().await,
        }
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
        tracing::info!("Metrics reset");
    }

    /// Component-wise health.
    pub async fn health(&self) -> HealthReport {
        let state = self.breaker.state().await;
        HealthReport::new(ComponentHealth {
            session_registry: self.sessions.health().await,
            agent_cache: self.agents.health().await,
            circuit_breaker: BreakerHealth {
                status: state.into(),
                state,
            },
        })
    }

    /// Drop a session's persisted state and cached handles.
    pub async fn forget_session(&self, session_id: &str) -> DispatchResult<()> {
        if !is_valid_session_id(session_id) {
            return Err(DispatchError::Validation(format!("Invalid session id '{session_id}'")));
        }
        self.agents.invalidate(session_id).await;
        self.sessions.forget(session_id).await?;
        Ok(())
    }

    /// Administrative reset: clear caches and session records, close the
    /// breaker, zero the metrics. Persisted session state is kept.
    pub async fn admin_reset(&self) {
        self.agents.invalidate_all().await;
        self.sessions.clear().await;
        self.breaker.reset().await;
        self.metrics.reset();
        tracing::warn!("Administrative reset performed");
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn agents(&self) -> &Arc<AgentCache> {
        &self.agents
    }

    pub fn breaker(&self) -> &Arc<CircuitBreakerService> {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

/// Strip null bytes, normalize line endings, trim, and bound the length.
pub fn sanitize_message(raw: &str, max_length: usize) -> DispatchResult<String> {
    let cleaned = raw.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");
    let message = cleaned.trim();

    if message.is_empty() {
        return Err(DispatchError::Validation("Message must not be empty".to_string()));
    }
    let length = message.chars().count();
    if length > max_length {
        return Err(DispatchError::Validation(format!(
            "Message is {length} characters, the maximum is {max_length}"
        )));
    }
    Ok(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::{MockAgentBackend, MockBehavior, MockReply};
    use crate::adapters::storage::FileStorage;
    use crate::domain::errors::ErrorKind;
    use crate::services::circuit_breaker::{CircuitBreakerConfig, CircuitState};

    struct Harness {
        _dir: tempfile::TempDir,
        backend: MockAgentBackend,
        dispatcher: Dispatcher,
    }

    fn harness(backend: MockAgentBackend, config: DispatcherConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));
        let dispatcher = Dispatcher::new(
            Arc::new(SessionRegistry::new(storage, 16)),
            Arc::new(AgentCache::new(Arc::new(backend.clone()), 16)),
            Arc::new(CircuitBreakerService::new(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                required_successes: 1,
            })),
            Arc::new(MetricsCollector::new(100)),
            config,
        );
        Harness {
            _dir: dir,
            backend,
            dispatcher,
        }
    }

    #[test]
    fn test_sanitize_message() {
        assert_eq!(sanitize_message("  a\r\nb\rc\0  ", 100).unwrap(), "a\nb\nc");
        assert!(matches!(sanitize_message(" \n\t\0 ", 100), Err(DispatchError::Validation(_))));
        assert!(sanitize_message("ééé", 3).is_ok());
        assert!(matches!(sanitize_message("abcd", 3), Err(DispatchError::Validation(_))));
    }

    #[tokio::test]
    async fn test_success_carries_session_and_history() {
        let h = harness(MockAgentBackend::new(), DispatcherConfig::default());

        let first = h.dispatcher.process(RawRequest::new("hello")).await.unwrap();
        assert!(first.success);
        assert_eq!(first.response, "[chat] turn 1: hello");
        assert!(is_valid_session_id(&first.session_id));

        let second = h
            .dispatcher
            .process(RawRequest::new("again").with_session(&first.session_id))
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.response, "[chat] turn 2: again");
        assert_eq!(h.backend.connects(), 1);
    }

    #[tokio::test]
    async fn test_validation_failures_skip_downstream() {
        let h = harness(MockAgentBackend::new(), DispatcherConfig::default());

        let empty = h.dispatcher.process(RawRequest::new("   ")).await.unwrap_err();
        assert_eq!(empty.kind, ErrorKind::ValidationError);

        let bad_type = h
            .dispatcher
            .process(RawRequest::new("hi").with_agent_type("poetry"))
            .await
            .unwrap_err();
        assert_eq!(bad_type.kind, ErrorKind::ValidationError);

        assert_eq!(h.backend.invocations(), 0);
        let snapshot = h.dispatcher.metrics().snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.errors_by_type.get(&ErrorKind::ValidationError), Some(&2));
        assert_eq!(h.dispatcher.breaker().stats().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_authentication() {
        let config = DispatcherConfig {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let h = harness(MockAgentBackend::new(), config);

        let missing = h.dispatcher.process(RawRequest::new("hi")).await.unwrap_err();
        assert_eq!(missing.kind, ErrorKind::AuthenticationError);

        let wrong = h
            .dispatcher
            .process(RawRequest::new("hi").with_api_key("guess"))
            .await
            .unwrap_err();
        assert_eq!(wrong.kind, ErrorKind::AuthenticationError);

        assert!(h
            .dispatcher
            .process(RawRequest::new("hi").with_api_key("secret"))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_against_breaker() {
        let backend = MockAgentBackend::with_behavior(
            MockBehavior::text("late").with_latency(Duration::from_secs(10)),
        );
        let config = DispatcherConfig {
            invocation_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let h = harness(backend, config);

        let err = h.dispatcher.process(RawRequest::new("slow")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(h.dispatcher.breaker().stats().await.failure_count, 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_rejects_without_invoking() {
        let backend = MockAgentBackend::with_behavior(MockBehavior::failure("model crashed"));
        let h = harness(backend, DispatcherConfig::default());

        for _ in 0..2 {
            let err = h.dispatcher.process(RawRequest::new("q")).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::AgentError);
            assert!(!err.message.contains("crashed"));
        }
        assert_eq!(h.dispatcher.breaker().state().await, CircuitState::Open);

        let rejected = h.dispatcher.process(RawRequest::new("q")).await.unwrap_err();
        assert_eq!(rejected.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(h.backend.invocations(), 2);

        let snapshot = h.dispatcher.metrics().snapshot();
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(snapshot.errors_by_type.get(&ErrorKind::ServiceUnavailable), Some(&1));
    }

    #[tokio::test]
    async fn test_debug_detail_and_construction_error() {
        let backend = MockAgentBackend::with_behavior(MockBehavior {
            connect_error: Some(InvocationError::Configuration("model path missing".into())),
            ..Default::default()
        });
        let config = DispatcherConfig {
            debug: true,
            ..Default::default()
        };
        let h = harness(backend, config);

        let err = h.dispatcher.process(RawRequest::new("q")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InternalError);
        let detail = err.detail.unwrap();
        assert!(detail["cause"].as_str().unwrap().contains("model path missing"));
    }

    #[tokio::test]
    async fn test_forget_and_admin_reset() {
        let h = harness(MockAgentBackend::new(), DispatcherConfig::default());
        h.backend
            .push_replies([MockReply::Text("one".into()), MockReply::Text("two".into())])
            .await;

        let first = h
            .dispatcher
            .process(RawRequest::new("x").with_session("keep"))
            .await
            .unwrap();
        assert_eq!(first.response, "one");

        h.dispatcher.forget_session("keep").await.unwrap();
        assert!(!h.dispatcher.agents().contains("keep"));
        assert!(matches!(
            h.dispatcher.forget_session("../x").await,
            Err(DispatchError::Validation(_))
        ));

        h.dispatcher.process(RawRequest::new("y")).await.unwrap();
        h.dispatcher.admin_reset().await;
        assert!(h.dispatcher.agents().is_empty().await);
        assert_eq!(h.dispatcher.metrics().snapshot().request_count, 0);
        assert_eq!(h.dispatcher.sessions().active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_metrics_report_and_health() {
        let h = harness(MockAgentBackend::new(), DispatcherConfig::default());
        h.dispatcher.process(RawRequest::new("hi")).await.unwrap();

        let report = serde_json::to_value(h.dispatcher.metrics_report().await).unwrap();
        assert_eq!(report["requestCount"], 1);
        assert_eq!(report["circuitBreaker"]["state"], "closed");
        assert_eq!(report["circuitBreaker"]["failureThreshold"], 2);

        let health = serde_json::to_value(h.dispatcher.health().await).unwrap();
        assert_eq!(health["status"], "operational");
        assert_eq!(health["components"]["agentCache"]["cachedAgents"], 1);
        assert_eq!(health["components"]["sessionRegistry"]["activeSessions"], 1);
    }
}
