//! # Auth Errors
//!
//! Handshake-time authentication failures.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Reasons a handshake is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credential presented
    #[error("Authentication token required")]
    MissingToken,

    /// Bad signature, bad shape, or claims we cannot use
    #[error("Invalid token")]
    InvalidToken,

    /// Signature fine, but past `exp`
    #[error("Token expired")]
    ExpiredToken,

    /// Signing a new token failed
    #[error("Internal error: token generation failed")]
    TokenGenerationFailed,
}

impl AuthError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingToken => 401,
            AuthError::InvalidToken => 401,
            AuthError::ExpiredToken => 401,
            AuthError::TokenGenerationFailed => 500,
        }
    }

    /// Stable reason code returned to clients
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::TokenGenerationFailed => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::MissingToken.status_code(), 401);
        assert_eq!(AuthError::ExpiredToken.status_code(), 401);
        assert_eq!(AuthError::TokenGenerationFailed.status_code(), 500);
    }

    #[test]
    fn test_reasons() {
        assert_eq!(AuthError::MissingToken.reason(), "missing_token");
        assert_eq!(AuthError::InvalidToken.reason(), "invalid_token");
        assert_eq!(AuthError::ExpiredToken.reason(), "expired_token");
    }
}
