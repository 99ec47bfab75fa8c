//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - StorageBackend: session state persistence
//! - AgentBackend / AgentSession: construction and invocation of downstream agents

pub mod agent_backend;
pub mod storage_backend;

pub use agent_backend::{AgentBackend, AgentBinding, AgentSession, SessionContext};
pub use storage_backend::StorageBackend;
