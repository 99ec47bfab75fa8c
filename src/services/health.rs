//! Component health reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::agent_cache::AgentCacheHealth;
use crate::services::circuit_breaker::CircuitState;
use crate::services::session_registry::SessionRegistryHealth;

/// Status of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Operational,
    Degraded,
    Down,
}

impl From<CircuitState> for ComponentStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => Self::Operational,
            CircuitState::HalfOpen => Self::Degraded,
            CircuitState::Open => Self::Down,
        }
    }
}

/// Breaker contribution to health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerHealth {
    pub status: ComponentStatus,
    pub state: CircuitState,
}

/// Per-component health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub session_registry: SessionRegistryHealth,
    pub agent_cache: AgentCacheHealth,
    pub circuit_breaker: BreakerHealth,
}

/// Health endpoint payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Worst status across components.
    pub status: ComponentStatus,
    pub components: ComponentHealth,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(components: ComponentHealth) -> Self {
        let status = components
            .session_registry
            .status
            .max(components.agent_cache.status)
            .max(components.circuit_breaker.status);

        Self {
            status,
            components,
            timestamp: Utc::now(),
        }
    }
}
