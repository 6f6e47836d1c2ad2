//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit.

use std::fmt;
use std::io;

use crate::config::ConfigError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration missing or invalid
    ConfigError,
    /// Startup failed (bind, feed connect, pool build)
    BootFailed,
    /// Change feed dropped while serving
    FeedLost,
    /// I/O error
    IoError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "ROWCAST_CLI_CONFIG_ERROR",
            Self::BootFailed => "ROWCAST_CLI_BOOT_FAILED",
            Self::FeedLost => "ROWCAST_CLI_FEED_LOST",
            Self::IoError => "ROWCAST_CLI_IO_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn feed_lost(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::FeedLost, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = CliError::feed_lost("connection reset");
        assert_eq!(err.to_string(), "ROWCAST_CLI_FEED_LOST: connection reset");
        assert_eq!(err.code(), &CliErrorCode::FeedLost);
    }

    #[test]
    fn test_from_config_error() {
        let err: CliError = ConfigError::Missing("JWT_SECRET").into();
        assert_eq!(err.code_str(), "ROWCAST_CLI_CONFIG_ERROR");
        assert_eq!(err.message(), "JWT_SECRET is required");
    }
}
