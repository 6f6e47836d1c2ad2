//! CLI argument definitions using clap
//!
//! Commands:
//! - rowcast serve [--config <path>] [--port <n>] [--host <addr>]
//! - rowcast token --user-id <id> [--label <name>] [--ttl-secs <n>] [--config <path>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rowcast - real-time row-change fan-out over WebSocket
#[derive(Parser, Debug)]
#[command(name = "rowcast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the fan-out server
    Serve {
        /// Optional JSON configuration file; environment overrides it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to bind (overrides PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind (overrides HOST)
        #[arg(long)]
        host: Option<String>,
    },

    /// Print a signed access token for a user
    Token {
        /// Subject (user id) of the token
        #[arg(long)]
        user_id: String,

        /// Display name carried in the token
        #[arg(long)]
        label: Option<String>,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,

        /// Optional JSON configuration file; environment overrides it
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
