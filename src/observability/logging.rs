//! Logging setup, powered by tracing-subscriber.
//!
//! Log lines go to stderr, either as compact text or as JSON lines. Call
//! sites use `tracing` macros with an upper-snake `event` field followed by
//! structured fields, e.g.
//!
//! ```ignore
//! tracing::info!(event = "CLIENT_CONNECTED", user_id = %id, "client connected");
//! ```

use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact text: timestamp LEVEL target fields
    Compact,
    /// JSON Lines
    Json,
}

impl LogFormat {
    /// `compact`, `json` or `jsonl`, any case
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(LogFormat::Compact),
            "json" | "jsonl" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Base level plus quiet defaults for chatty dependencies
pub fn build_env_filter(level: &str) -> Result<EnvFilter, String> {
    let mut directives = vec![level.to_string()];

    let noisy: &[(&str, &str)] = &[
        ("hyper", "warn"),
        ("tokio_postgres", "warn"),
        ("deadpool", "warn"),
        ("tungstenite", "warn"),
        ("tower_http", "info"),
    ];
    for (target, lvl) in noisy {
        directives.push(format!("{}={}", target, lvl));
    }

    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str)
        .map_err(|e| format!("Invalid tracing filter '{}': {}", filter_str, e))
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces the configured level entirely.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), String> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_env_filter(level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| format!("Failed to install logger: {}", e))
}
