pub mod agent;
pub mod config;
pub mod session;

pub use agent::AgentKind;
pub use config::{
    AgentServiceConfig, BreakerConfig, LogFormat, LoggingConfig, RelayConfig, RotationPolicy,
    ServerConfig, StorageConfig, StorageKind,
};
pub use session::{
    generate_session_id, is_valid_session_id, Session, SessionState, Turn, TurnRole,
};
