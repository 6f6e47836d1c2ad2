//! # rowcast Auth Module
//!
//! Bearer-token verification for WebSocket handshakes. End-user accounts
//! and login live elsewhere; tokens minted here are for operators and tests.

pub mod errors;
pub mod jwt;

pub use errors::{AuthError, AuthResult};
pub use jwt::{bearer_token, AuthConfig, Authenticator, Claims, Identity};
