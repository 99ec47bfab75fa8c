//! HTTP surface of the relay (axum).

pub mod handlers;
pub mod server;

pub use handlers::{ApiError, ChatRequest, SESSION_COOKIE, SESSION_HEADER};
pub use server::{RelayHttpServer, RelayState};
