//! Domain layer for the relay
//!
//! Error taxonomy, core models and the port traits that storage and agent
//! adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    DispatchError, DispatchResult, ErrorEnvelope, ErrorKind, InvocationError, StorageError,
};
