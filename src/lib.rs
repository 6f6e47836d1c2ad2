//! rowcast - real-time row-change fan-out over WebSocket
//!
//! Listens for row changes published by the database, pushes each change to
//! the connections of the row's owner and a content-free cue to everyone,
//! and serves owner-scoped refresh requests.

pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod http_server;
pub mod observability;
pub mod realtime;
pub mod store;
