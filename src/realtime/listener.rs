//! # Change Feed Listener
//!
//! One persistent `LISTEN` on the notify channel. Raw notifications are
//! parsed into [`ChangeEvent`]s and handed to the dispatch loop; malformed
//! ones are dropped. Losing the upstream connection is fatal.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};

use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;
use crate::observability::MetricsRegistry;
use crate::store::{is_identifier, quote_ident};

/// Driver to listener queue depth. When full the driver stops polling the
/// connection and notifications wait in the server's queue.
pub const FEED_QUEUE_CAPACITY: usize = 256;

/// What the upstream connection reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// A `NOTIFY` delivered on a listened channel
    Notification { channel: String, payload: String },
    /// The connection failed; no further messages follow
    Error(String),
}

/// Dedicated Postgres connection holding the `LISTEN`
pub struct PostgresFeed {
    // Dropping the client ends the session server-side.
    _client: Client,
    driver: JoinHandle<()>,
    channel: String,
}

impl PostgresFeed {
    /// Connect, start driving the connection and `LISTEN` on `channel`.
    pub async fn connect(
        database_url: &str,
        channel: &str,
    ) -> RealtimeResult<(Self, mpsc::Receiver<FeedMessage>)> {
        if !is_identifier(channel) {
            return Err(RealtimeError::Feed(format!(
                "invalid notify channel '{}'",
                channel
            )));
        }

        let (client, mut connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| RealtimeError::Feed(format!("connect failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(FEED_QUEUE_CAPACITY);
        let driver = tokio::spawn(async move {
            let messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            futures_util::pin_mut!(messages);

            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        let forwarded = FeedMessage::Notification {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                        };
                        if tx.send(forwarded).await.is_err() {
                            return;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        tracing::debug!(event = "FEED_NOTICE", notice = %notice.message());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(FeedMessage::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = tx
                .send(FeedMessage::Error("connection closed".to_string()))
                .await;
        });

        if let Err(e) = client
            .batch_execute(&format!("LISTEN {}", quote_ident(channel)))
            .await
        {
            driver.abort();
            return Err(RealtimeError::Feed(format!("LISTEN failed: {}", e)));
        }

        tracing::info!(event = "FEED_LISTENING", channel = %channel);

        Ok((
            Self {
                _client: client,
                driver,
                channel: channel.to_string(),
            },
            rx,
        ))
    }

    /// Tear the subscription down
    pub fn close(self) {
        tracing::info!(event = "FEED_CLOSED", channel = %self.channel);
    }
}

impl Drop for PostgresFeed {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Turns feed messages into change events for the dispatch loop
pub struct EventListener {
    channel: String,
    events: mpsc::Sender<ChangeEvent>,
    metrics: Arc<MetricsRegistry>,
}

impl EventListener {
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::Sender<ChangeEvent>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            metrics,
        }
    }

    /// Consume the feed until shutdown (`Ok`) or feed loss (`Err(Feed)`).
    pub async fn run(
        self,
        mut feed: mpsc::Receiver<FeedMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RealtimeResult<()> {
        loop {
            tokio::select! {
                message = feed.recv() => match message {
                    Some(FeedMessage::Notification { channel, payload }) => {
                        if channel != self.channel {
                            tracing::debug!(event = "FEED_FOREIGN_CHANNEL", channel = %channel);
                            continue;
                        }
                        self.forward(&payload).await?;
                    }
                    Some(FeedMessage::Error(reason)) => {
                        tracing::error!(event = "FEED_LOST", reason = %reason);
                        return Err(RealtimeError::Feed(reason));
                    }
                    None => {
                        tracing::error!(event = "FEED_LOST", reason = "feed channel closed");
                        return Err(RealtimeError::Feed("feed channel closed".to_string()));
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!(event = "LISTENER_STOPPED");
                    return Ok(());
                }
            }
        }
    }

    async fn forward(&self, payload: &str) -> RealtimeResult<()> {
        let event = match ChangeEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.increment_events_dropped();
                tracing::warn!(event = "CHANGE_EVENT_DROPPED", error = %e);
                return Ok(());
            }
        };

        self.metrics.increment_events_received();
        tracing::debug!(
            event = "CHANGE_EVENT_RECEIVED",
            table = %event.topic,
            action = %event.action,
        );

        self.events
            .send(event)
            .await
            .map_err(|_| RealtimeError::Internal("dispatch loop stopped".to_string()))
    }
}
