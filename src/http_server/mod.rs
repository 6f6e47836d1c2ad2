//! # HTTP Server Module
//!
//! Axum server exposing the WebSocket endpoint and the operational routes.
//!
//! # Endpoints
//!
//! - `/ws` - Authenticated WebSocket upgrade
//! - `/health` - Liveness of the change feed and data store
//! - `/metrics` - Connection, room and counter snapshot

pub mod observability_routes;
pub mod realtime_routes;
pub mod server;

pub use server::{build_router, HttpServer};
