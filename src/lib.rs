//! Agent relay - resilient, session-aware proxy in front of agent services
//!
//! The relay sits between chat clients and a slow, fallible downstream
//! agent. It keeps conversations continuous through session ids, reuses
//! expensive per-session agent handles, fails fast behind a circuit breaker
//! when the agent is unhealthy, and accounts for every request.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): error taxonomy, models, and port traits
//! - **Service Layer** (`services`): session registry, agent cache, circuit
//!   breaker, metrics, and the dispatcher
//! - **Adapters** (`adapters`): storage backends, agent backends, HTTP surface
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, wiring
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use agent_relay::infrastructure::{config::ConfigLoader, setup};
//! use agent_relay::RawRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let dispatcher = setup::build_dispatcher(&config)?;
//!     let reply = dispatcher.process(RawRequest::new("hello")).await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DispatchError, ErrorEnvelope, ErrorKind, InvocationError, StorageError};
pub use domain::models::{AgentKind, RelayConfig, Session, SessionState};
pub use domain::ports::{AgentBackend, AgentSession, StorageBackend};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ChatResponse, Dispatcher, RawRequest};
