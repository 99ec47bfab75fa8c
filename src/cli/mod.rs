//! Command-line interface.

pub mod commands;
pub mod types;

pub use commands::run;
pub use types::{Cli, Commands, ConfigCommands};
