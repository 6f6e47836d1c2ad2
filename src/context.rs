//! Server Context
//!
//! Built once at startup and shared by every component: configuration,
//! authenticator, registry, router, row store, metrics and the shutdown
//! signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::observability::MetricsRegistry;
use crate::realtime::{ConnectionRegistry, EventRouter};
use crate::store::RowStore;

pub struct ServerContext {
    pub config: ServerConfig,
    pub authenticator: Authenticator,
    pub metrics: Arc<MetricsRegistry>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<EventRouter>,
    pub store: Arc<dyn RowStore>,

    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    feed_connected: AtomicBool,
    feed_shutdown: broadcast::Sender<()>,
    client_shutdown: broadcast::Sender<()>,
}

impl ServerContext {
    /// Wire up components from config. The feed starts disconnected.
    pub fn new(config: ServerConfig, store: Arc<dyn RowStore>) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(config.topics()),
            Arc::clone(&metrics),
        ));
        let router = Arc::new(EventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.refresh_policy(),
            Arc::clone(&metrics),
        ));
        let authenticator = Authenticator::new(config.auth_config());
        let (feed_shutdown, _) = broadcast::channel(1);
        let (client_shutdown, _) = broadcast::channel(1);

        Self {
            config,
            authenticator,
            metrics,
            registry,
            router,
            store,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            feed_connected: AtomicBool::new(false),
            feed_shutdown,
            client_shutdown,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    pub fn feed_connected(&self) -> bool {
        self.feed_connected.load(Ordering::Acquire)
    }

    pub fn set_feed_connected(&self, connected: bool) {
        self.feed_connected.store(connected, Ordering::Release);
    }

    /// Receiver fired when the change feed should stop
    pub fn feed_shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.feed_shutdown.subscribe()
    }

    /// Receiver fired when client connections should close
    pub fn client_shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.client_shutdown.subscribe()
    }

    /// Stop the change feed. Returns the number of listeners signalled.
    pub fn shutdown_feed(&self) -> usize {
        self.set_feed_connected(false);
        self.feed_shutdown.send(()).unwrap_or(0)
    }

    /// Close every client connection with a going-away frame.
    pub fn shutdown_clients(&self) -> usize {
        self.client_shutdown.send(()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRowStore;

    fn context() -> ServerContext {
        let config = ServerConfig {
            jwt_secret: "secret".to_string(),
            ..ServerConfig::default()
        };
        ServerContext::new(config, Arc::new(MemoryRowStore::new()))
    }

    #[test]
    fn test_feed_flag() {
        let ctx = context();
        assert!(!ctx.feed_connected());
        ctx.set_feed_connected(true);
        assert!(ctx.feed_connected());
        ctx.shutdown_feed();
        assert!(!ctx.feed_connected());
    }

    #[tokio::test]
    async fn test_client_shutdown_reaches_subscribers() {
        let ctx = context();
        let mut a = ctx.client_shutdown_signal();
        let mut b = ctx.client_shutdown_signal();

        assert_eq!(ctx.shutdown_clients(), 2);
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[test]
    fn test_shutdown_without_subscribers() {
        let ctx = context();
        assert_eq!(ctx.shutdown_feed(), 0);
        assert_eq!(ctx.shutdown_clients(), 0);
    }

    #[test]
    fn test_registry_uses_configured_topics() {
        let ctx = context();
        assert!(ctx.registry.allowed_topics().contains("meal_plans"));
        assert!(!ctx.registry.allowed_topics().contains("users"));
    }
}
