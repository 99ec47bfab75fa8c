//! Core relay services
//!
//! The resilient dispatch layer: session resolution, agent handle caching,
//! the circuit breaker, metrics, and the dispatcher that ties them together.

pub mod agent_cache;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod session_registry;

pub use agent_cache::{AgentCache, AgentCacheHealth, AgentHandle, InvocationLease};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerService, CircuitCheckResult, CircuitState,
    CircuitStats,
};
pub use dispatcher::{ChatResponse, Dispatcher, DispatcherConfig, MetricsReport, RawRequest};
pub use health::{ComponentStatus, HealthReport};
pub use metrics::{MetricsCollector, MetricsSnapshot, Outcome};
pub use session_registry::{SessionRegistry, SessionRegistryHealth, SessionStore};
