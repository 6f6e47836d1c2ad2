//! CLI module for rowcast
//!
//! Provides command-line interface for:
//! - serve: Boot the fan-out server and run until shutdown
//! - token: Mint a signed access token for a user

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{run, run_command, serve, token};
pub use errors::{CliError, CliErrorCode, CliResult};
