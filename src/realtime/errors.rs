//! # Real-Time Errors
//!
//! Error types for the real-time module.

use thiserror::Error;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Real-time errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Request Errors
    // ==================
    /// Topic is not in the allowed set
    #[error("Invalid table: {0}")]
    InvalidTopic(String),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Connection is not (or no longer) registered
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    // ==================
    // Data Store Errors
    // ==================
    /// Refresh query failed or timed out
    #[error("Failed to fetch data: {0}")]
    QueryFailed(String),

    // ==================
    // Change Feed Errors
    // ==================
    /// Raw notification could not be turned into a change event
    #[error("Invalid change event: {0}")]
    InvalidEvent(String),

    /// Upstream change feed is gone
    #[error("Change feed lost: {0}")]
    Feed(String),

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Returns the close code for WebSocket
    pub fn close_code(&self) -> u16 {
        match self {
            RealtimeError::InvalidMessage(_) => 1003,
            RealtimeError::InvalidTopic(_) => 4000,
            RealtimeError::UnknownConnection(_) => 4001,
            RealtimeError::QueryFailed(_) => 4500,
            RealtimeError::InvalidEvent(_) => 4501,
            RealtimeError::Feed(_) => 1011,
            RealtimeError::Internal(_) => 1011,
        }
    }

    /// Text safe to show the requesting client
    pub fn client_message(&self) -> String {
        match self {
            RealtimeError::QueryFailed(_) => "Failed to fetch data".to_string(),
            RealtimeError::Feed(_) | RealtimeError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Failure to hand a message to a single recipient.
///
/// Never aborts a broadcast; the recipient is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Outbound queue closed (connection is going away)
    #[error("recipient closed")]
    Closed,

    /// Outbound queue full (client is not reading)
    #[error("recipient lagging")]
    Lagging,
}
