//! CLI command implementations
//!
//! `serve` boots the server and runs until a signal or feed loss.
//! Shutdown runs in order, each step bounded by the shutdown timeout:
//! stop accepting, close the feed, close clients, exit.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::http_server::HttpServer;
use crate::observability::init_logging;
use crate::realtime::{EventListener, PostgresFeed};
use crate::store::PgRowStore;

/// Listener to dispatch loop queue depth
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port, host } => serve(config.as_deref(), port, host),
        Command::Token {
            user_id,
            label,
            ttl_secs,
            config,
        } => token(config.as_deref(), &user_id, label.as_deref(), ttl_secs),
    }
}

/// Run the server until SIGINT/SIGTERM or change feed loss
pub fn serve(config_path: Option<&Path>, port: Option<u16>, host: Option<String>) -> CliResult<()> {
    let mut config = ServerConfig::load(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(host) = host {
        config.host = host;
    }
    config.validate()?;

    init_logging(&config.log_level, config.log_format()).map_err(CliError::boot_failed)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(run_server(config))
}

/// Print a signed token for `user_id`
pub fn token(
    config_path: Option<&Path>,
    user_id: &str,
    label: Option<&str>,
    ttl_secs: i64,
) -> CliResult<()> {
    let config = ServerConfig::load(config_path)?;
    let token = issue_token(&config, user_id, label, ttl_secs)?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", token)?;
    Ok(())
}

fn issue_token(
    config: &ServerConfig,
    user_id: &str,
    label: Option<&str>,
    ttl_secs: i64,
) -> CliResult<String> {
    if config.jwt_secret.trim().is_empty() {
        return Err(CliError::config_error("JWT_SECRET is required"));
    }
    if user_id.trim().is_empty() {
        return Err(CliError::config_error("user id must not be blank"));
    }
    if ttl_secs <= 0 {
        return Err(CliError::config_error("ttl must be greater than zero"));
    }

    Authenticator::new(config.auth_config())
        .issue(user_id, label, chrono::Duration::seconds(ttl_secs))
        .map_err(|e| CliError::config_error(e.to_string()))
}

/// Why the serving loop ended
enum Stop {
    Signal,
    FeedLost(String),
    HttpFailed(String),
}

async fn run_server(config: ServerConfig) -> CliResult<()> {
    let store = PgRowStore::new(&config.store_config())
        .map_err(|e| CliError::boot_failed(format!("data store: {}", e)))?;
    let ctx = Arc::new(ServerContext::new(config, Arc::new(store)));
    let shutdown_timeout = ctx.config.shutdown_timeout();

    let server = HttpServer::bind(Arc::clone(&ctx)).await.map_err(|e| {
        CliError::boot_failed(format!("bind {}: {}", ctx.config.socket_addr(), e))
    })?;

    let (feed, feed_rx) =
        PostgresFeed::connect(&ctx.config.database_url, &ctx.config.notify_channel)
            .await
            .map_err(|e| CliError::boot_failed(e.to_string()))?;
    ctx.set_feed_connected(true);

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let dispatch_task = tokio::spawn(Arc::clone(&ctx.router).run_dispatch_loop(events_rx));

    let listener = EventListener::new(
        ctx.config.notify_channel.clone(),
        events_tx,
        Arc::clone(&ctx.metrics),
    );
    let mut listener_task = tokio::spawn(listener.run(feed_rx, ctx.feed_shutdown_signal()));

    let (stop_http_tx, stop_http_rx) = oneshot::channel::<()>();
    let mut http_task = tokio::spawn(server.serve(async move {
        let _ = stop_http_rx.await;
    }));

    tracing::info!(
        event = "SERVER_STARTED",
        addr = %ctx.config.socket_addr(),
        topics = ctx.registry.allowed_topics().len(),
        channel = %ctx.config.notify_channel,
    );

    let mut listener_done = false;
    let mut http_done = false;
    let stop = tokio::select! {
        _ = shutdown_signal() => Stop::Signal,
        result = &mut listener_task => {
            listener_done = true;
            match result {
                Ok(Ok(())) => Stop::Signal,
                Ok(Err(e)) => Stop::FeedLost(e.to_string()),
                Err(e) => Stop::FeedLost(format!("listener task failed: {}", e)),
            }
        }
        result = &mut http_task => {
            http_done = true;
            match result {
                Ok(Ok(())) => Stop::HttpFailed("server exited".to_string()),
                Ok(Err(e)) => Stop::HttpFailed(e.to_string()),
                Err(e) => Stop::HttpFailed(format!("server task failed: {}", e)),
            }
        }
    };

    tracing::info!(event = "SHUTDOWN_STARTED");

    // 1. Stop accepting new connections.
    let _ = stop_http_tx.send(());

    // 2. Close the feed subscription.
    ctx.shutdown_feed();
    if !listener_done
        && tokio::time::timeout(shutdown_timeout, &mut listener_task)
            .await
            .is_err()
    {
        tracing::warn!(event = "SHUTDOWN_STEP_TIMEOUT", step = "feed");
        listener_task.abort();
    }
    feed.close();
    if tokio::time::timeout(shutdown_timeout, dispatch_task).await.is_err() {
        tracing::warn!(event = "SHUTDOWN_STEP_TIMEOUT", step = "dispatch");
    }

    // 3. Close all client connections.
    let signalled = ctx.shutdown_clients();
    if tokio::time::timeout(shutdown_timeout, wait_for_clients(&ctx)).await.is_err() {
        tracing::warn!(
            event = "SHUTDOWN_STEP_TIMEOUT",
            step = "clients",
            remaining = ctx.registry.connection_count(),
        );
    }
    if !http_done
        && tokio::time::timeout(shutdown_timeout, &mut http_task)
            .await
            .is_err()
    {
        tracing::warn!(event = "SHUTDOWN_STEP_TIMEOUT", step = "http");
        http_task.abort();
    }

    tracing::info!(event = "SHUTDOWN_COMPLETE", clients_signalled = signalled);

    match stop {
        Stop::Signal => Ok(()),
        Stop::FeedLost(reason) => Err(CliError::feed_lost(reason)),
        Stop::HttpFailed(reason) => {
            Err(CliError::io_error(format!("HTTP server failed: {}", reason)))
        }
    }
}

async fn wait_for_clients(ctx: &ServerContext) {
    while ctx.registry.connection_count() > 0 {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(event = "SIGNAL_HANDLER_FAILED", signal = "SIGINT", error = %e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(event = "SIGNAL_HANDLER_FAILED", signal = "SIGTERM", error = %e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(event = "SIGNAL_RECEIVED", signal = "SIGINT"),
        _ = terminate => tracing::info!(event = "SIGNAL_RECEIVED", signal = "SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            jwt_secret: "cli-secret".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_issue_token_verifies() {
        let config = config();
        let token = issue_token(&config, "u1", Some("Ada"), 600).unwrap();

        let identity = Authenticator::new(config.auth_config())
            .authenticate(Some(&token))
            .unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.user_label, "Ada");
    }

    #[test]
    fn test_issue_token_requires_secret() {
        let err = issue_token(&ServerConfig::default(), "u1", None, 600).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_issue_token_rejects_bad_input() {
        assert!(issue_token(&config(), "  ", None, 600).is_err());
        assert!(issue_token(&config(), "u1", None, 0).is_err());
    }
}
