//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Component wiring and config file initialization

pub mod config;
pub mod logging;
pub mod setup;
