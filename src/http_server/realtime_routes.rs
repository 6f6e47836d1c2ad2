//! Realtime HTTP Routes
//!
//! WebSocket upgrade. The credential is checked before the upgrade, so a
//! refused client never gets a socket, a session or a room.

use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::{bearer_token, AuthError};
use crate::context::ServerContext;
use crate::realtime::run_connection;

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub reason: &'static str,
}

/// Create realtime routes
pub fn realtime_routes(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(ctx)
}

/// `Authorization: Bearer` wins over `?token=`
fn handshake_token<'a>(headers: &'a HeaderMap, query: &'a HandshakeQuery) -> Option<&'a str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .or(query.token.as_deref())
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<ServerContext>>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    let identity = match ctx
        .authenticator
        .authenticate(handshake_token(&headers, &query))
    {
        Ok(identity) => identity,
        Err(e) => {
            ctx.metrics.increment_auth_failures();
            tracing::warn!(event = "AUTH_REJECTED", reason = e.reason());
            return auth_error_response(e);
        }
    };

    let router = Arc::clone(&ctx.router);
    let outbound_buffer = ctx.config.outbound_buffer;
    let shutdown = ctx.client_shutdown_signal();

    ws.on_upgrade(move |socket| run_connection(socket, identity, router, outbound_buffer, shutdown))
}

fn auth_error_response(e: AuthError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    let body = AuthErrorResponse {
        error: e.to_string(),
        reason: e.reason(),
    };
    (status, Json(body)).into_response()
}
