//! Observability HTTP Routes
//!
//! Health check and metrics snapshot.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::ServerContext;
use crate::observability::{memory_usage, MemoryUsage, MetricsSnapshot};

/// Longest the health check waits for the data store
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub connections: usize,
    pub database: &'static str,
}

/// Metrics response
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub connected_clients: usize,
    pub rooms: Vec<String>,
    /// Seconds since start
    pub uptime: u64,
    pub memory_usage: MemoryUsage,
    pub timestamp: DateTime<Utc>,
    pub counters: MetricsSnapshot,
}

/// Create observability routes
pub fn observability_routes(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(ctx)
}

/// Healthy only while the feed is live and the store answers
async fn health_handler(State(ctx): State<Arc<ServerContext>>) -> impl IntoResponse {
    let store_ok = matches!(
        tokio::time::timeout(HEALTH_PING_TIMEOUT, ctx.store.ping()).await,
        Ok(Ok(()))
    );
    let connected = ctx.feed_connected() && store_ok;

    let response = HealthResponse {
        status: if connected { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        connections: ctx.registry.connection_count(),
        database: if connected { "connected" } else { "disconnected" },
    };

    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn metrics_handler(State(ctx): State<Arc<ServerContext>>) -> impl IntoResponse {
    let memory = tokio::task::spawn_blocking(memory_usage)
        .await
        .unwrap_or_default();

    let response = MetricsResponse {
        connected_clients: ctx.registry.connection_count(),
        rooms: ctx.registry.room_ids(),
        uptime: ctx.uptime().as_secs(),
        memory_usage: memory,
        timestamp: Utc::now(),
        counters: ctx.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}
