//! # HTTP Server
//!
//! Combines the realtime and observability routers behind CORS and request
//! tracing, and serves them until the shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::observability_routes::observability_routes;
use super::realtime_routes::realtime_routes;
use crate::context::ServerContext;

/// Build the combined router
pub fn build_router(ctx: Arc<ServerContext>) -> Router {
    let cors = cors_layer(&ctx.config.cors_origins);

    Router::new()
        .merge(observability_routes(Arc::clone(&ctx)))
        .merge(realtime_routes(ctx))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<_> = origins.iter().filter_map(|s| s.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// HTTP server bound to a listener
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Bind the configured address
    pub async fn bind(ctx: Arc<ServerContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(ctx.config.socket_addr()).await?;
        Ok(Self::with_listener(listener, ctx))
    }

    /// Serve on an already bound listener
    pub fn with_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> Self {
        Self {
            listener,
            router: build_router(ctx),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves; then stop accepting.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        tracing::info!(event = "HTTP_LISTENING", addr = %addr);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!(event = "HTTP_STOPPED");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::MemoryRowStore;

    #[tokio::test]
    async fn test_binds_ephemeral_port() {
        let ctx = Arc::new(ServerContext::new(
            ServerConfig::default(),
            Arc::new(MemoryRowStore::new()),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = HttpServer::with_listener(listener, ctx);
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_cors_with_origins() {
        let _layer = cors_layer(&["http://localhost:5173".to_string()]);
        let _layer = cors_layer(&[]);
    }
}
