//! Adapters for external systems: session storage, downstream agents, and
//! the HTTP surface.

pub mod agents;
pub mod http;
pub mod storage;
