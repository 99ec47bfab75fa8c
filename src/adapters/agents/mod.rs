//! Downstream agent backends.

pub mod http;
pub mod mock;

pub use http::{HttpAgentBackend, HttpAgentConfig};
pub use mock::{MockAgentBackend, MockBehavior, MockReply};
