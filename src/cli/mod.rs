//! Command-line interface structure and handlers.

pub mod chat;
pub mod commands;
pub mod config_cmd;
pub mod connection;

pub use commands::{handle_command, CliArgs, Commands};
