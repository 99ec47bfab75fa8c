//! Circuit breaker pattern for failure detection and recovery.
//!
//! Gates every downstream invocation. After `failure_threshold`
//! consecutive failures the circuit opens and requests fail fast; once
//! `recovery_timeout` has elapsed a single probe is admitted at a time
//! until `required_successes` probes succeed in a row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::models::BreakerConfig;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before admitting a probe.
    pub recovery_timeout: Duration,
    /// Successful probes in half-open state needed to close the circuit.
    pub required_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            required_successes: config.required_successes.max(1),
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is testing if the downstream has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Result of a circuit breaker check.
///
/// The admission is handed back when reporting the outcome so that late
/// results from requests admitted under an earlier state are not mistaken
/// for probe results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitCheckResult {
    /// Request is allowed.
    Allowed,
    /// Request is the single half-open probe.
    Testing,
    /// Request is blocked by an open circuit.
    Blocked { retry_after: Duration },
}

impl CircuitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Testing)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Circuit breaker state machine.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success while closed.
    pub consecutive_failures: u32,
    /// When the circuit was last opened.
    pub opened_at: Option<Instant>,
    /// Wall-clock twin of `opened_at`, for reporting.
    pub opened_at_utc: Option<DateTime<Utc>>,
    /// Successful probes in the current half-open period.
    pub half_open_successes: u32,
    /// Whether a probe is currently outstanding.
    pub half_open_in_flight: bool,
    /// When state last changed.
    pub state_changed_at: DateTime<Utc>,
    /// Total times circuit opened.
    pub open_count: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker.
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_at_utc: None,
            half_open_successes: 0,
            half_open_in_flight: false,
            state_changed_at: Utc::now(),
            open_count: 0,
        }
    }

    /// Decide whether a request may proceed at `now`.
    pub fn check(&mut self, now: Instant, config: &CircuitBreakerConfig) -> CircuitCheckResult {
        match self.state {
            CircuitState::Closed => CircuitCheckResult::Allowed,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map_or(config.recovery_timeout, |at| now.saturating_duration_since(at));

                if elapsed >= config.recovery_timeout {
                    self.half_open();
                    self.half_open_in_flight = true;
                    CircuitCheckResult::Testing
                } else {
                    CircuitCheckResult::Blocked {
                        retry_after: config.recovery_timeout - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight {
                    CircuitCheckResult::Blocked {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    self.half_open_in_flight = true;
                    CircuitCheckResult::Testing
                }
            }
        }
    }

    /// Record a successful invocation admitted as `admission`.
    pub fn record_success(&mut self, admission: &CircuitCheckResult, config: &CircuitBreakerConfig) {
        match (self.state, admission) {
            (CircuitState::Closed, _) => self.consecutive_failures = 0,
            (CircuitState::HalfOpen, CircuitCheckResult::Testing) => {
                self.half_open_in_flight = false;
                self.half_open_successes += 1;
                if self.half_open_successes >= config.required_successes {
                    self.close();
                }
            }
            // Stale result from before the circuit opened.
            _ => {}
        }
    }

    /// Record a failed invocation admitted as `admission`.
    pub fn record_failure(
        &mut self,
        now: Instant,
        admission: &CircuitCheckResult,
        config: &CircuitBreakerConfig,
    ) {
        match (self.state, admission) {
            (CircuitState::Closed, _) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.open(now);
                }
            }
            (CircuitState::HalfOpen, CircuitCheckResult::Testing) => self.open(now),
            _ => {}
        }
    }

    /// Open the circuit.
    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.opened_at_utc = Some(Utc::now());
        self.state_changed_at = Utc::now();
        self.half_open_successes = 0;
        self.half_open_in_flight = false;
        self.open_count += 1;
    }

    /// Close the circuit.
    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.opened_at_utc = None;
        self.state_changed_at = Utc::now();
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.half_open_in_flight = false;
    }

    /// Transition to half-open.
    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.state_changed_at = Utc::now();
        self.half_open_successes = 0;
        self.half_open_in_flight = false;
    }

    /// Time left before an open circuit admits a probe.
    pub fn time_until_half_open(&self, now: Instant, config: &CircuitBreakerConfig) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(at)) => Some(
                config
                    .recovery_timeout
                    .saturating_sub(now.saturating_duration_since(at)),
            ),
            _ => None,
        }
    }

    /// Manually reset the circuit.
    pub fn reset(&mut self) {
        self.close();
        self.open_count = 0;
    }
}

/// Reportable breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Seconds until an open circuit admits a probe.
    pub time_until_half_open: Option<f64>,
    pub half_open_successes: u32,
    pub required_successes: u32,
    pub open_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

/// Shared circuit breaker guarding the downstream agent service.
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuit: RwLock<CircuitBreaker>,
}

impl CircuitBreakerService {
    /// Create a new circuit breaker service.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuit: RwLock::new(CircuitBreaker::new()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Check whether a request may go downstream.
    pub async fn check(&self) -> CircuitCheckResult {
        let mut circuit = self.circuit.write().await;
        let was = circuit.state;
        let result = circuit.check(Instant::now(), &self.config);

        if was == CircuitState::Open && circuit.state == CircuitState::HalfOpen {
            tracing::info!("Circuit breaker half-open, admitting probe");
        }
        result
    }

    /// Record a successful invocation.
    pub async fn record_success(&self, admission: &CircuitCheckResult) {
        let mut circuit = self.circuit.write().await;
        let was = circuit.state;
        circuit.record_success(admission, &self.config);

        if was == CircuitState::HalfOpen && circuit.state == CircuitState::Closed {
            tracing::info!("Circuit breaker closed after successful probes");
        }
    }

    /// Record a failed invocation.
    pub async fn record_failure(&self, admission: &CircuitCheckResult, reason: &str) {
        let mut circuit = self.circuit.write().await;
        let was = circuit.state;
        circuit.record_failure(Instant::now(), admission, &self.config);

        if was != CircuitState::Open && circuit.state == CircuitState::Open {
            tracing::warn!(
                reason,
                open_count = circuit.open_count,
                recovery_timeout_secs = self.config.recovery_timeout.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.circuit.read().await.state
    }

    /// Get statistics for reporting.
    pub async fn stats(&self) -> CircuitStats {
        let circuit = self.circuit.read().await;
        CircuitStats {
            state: circuit.state,
            failure_count: circuit.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            time_until_half_open: circuit
                .time_until_half_open(Instant::now(), &self.config)
                .map(|d| d.as_secs_f64()),
            half_open_successes: circuit.half_open_successes,
            required_successes: self.config.required_successes,
            open_count: circuit.open_count,
            opened_at: circuit.opened_at_utc,
            state_changed_at: circuit.state_changed_at,
        }
    }

    /// Manually close the circuit.
    pub async fn reset(&self) {
        self.circuit.write().await.reset();
        tracing::info!("Circuit breaker reset");
    }

    /// Get configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
