//! # WebSocket Connection Handler
//!
//! Drives one authenticated socket from admission to disconnect.
//!
//! Each connection runs two halves:
//! - a reader loop that answers client requests, and
//! - a writer task that drains the connection's outbound queue.
//!
//! Everything sent to the client, replies and broadcasts alike, goes through
//! the one outbound queue, so per-connection order is preserved.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, oneshot};

use super::errors::RealtimeError;
use super::message::{ClientMessage, PeerUpdate, ServerMessage};
use super::registry::{outbound_channel, ConnectionId, OutboundReceiver, OutboundSender};
use super::router::EventRouter;
use crate::auth::Identity;

/// Close code sent when the server goes away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a close frame
    ClientClosed(Option<u16>),
    /// Socket errored or ended without a close frame
    Transport(String),
    /// Server is shutting down
    ServerShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientClosed(Some(code)) => write!(f, "client closed ({})", code),
            DisconnectReason::ClientClosed(None) => write!(f, "client closed"),
            DisconnectReason::Transport(e) => write!(f, "transport: {}", e),
            DisconnectReason::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}

/// Run a connection until it closes. The identity is already verified.
pub async fn run_connection(
    socket: WebSocket,
    identity: Identity,
    router: Arc<EventRouter>,
    outbound_buffer: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let connection_id = ConnectionId::new();
    let registry = Arc::clone(router.registry());
    let (outbound_tx, outbound_rx) = outbound_channel(outbound_buffer.max(1));

    let session = match registry.register(connection_id, identity, outbound_tx.clone()) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(event = "SESSION_REJECTED", error = %e);
            let mut socket = socket;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: e.close_code(),
                    reason: "registration failed".into(),
                })))
                .await;
            return;
        }
    };

    tracing::info!(
        event = "CLIENT_CONNECTED",
        connection_id = %connection_id,
        user_id = %session.user_id,
        user = %session.user_label,
    );

    let (sink, stream) = socket.split();
    let (close_tx, close_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, close_rx));

    reply(
        &outbound_tx,
        ServerMessage::Connected {
            message: "Connected to real-time server".to_string(),
            user_id: session.user_id.clone(),
            timestamp: Utc::now(),
        },
    )
    .await;

    let connection = Connection {
        id: connection_id,
        router: Arc::clone(&router),
        outbound: outbound_tx,
    };
    let reason = connection.read_loop(stream, &mut shutdown).await;

    registry.unregister(&connection_id);
    drop(connection);

    if reason == DisconnectReason::ServerShutdown {
        let _ = close_tx.send(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: "server shutting down".into(),
        });
    } else {
        drop(close_tx);
    }
    let _ = writer.await;

    tracing::info!(
        event = "CLIENT_DISCONNECTED",
        connection_id = %connection_id,
        user_id = %session.user_id,
        reason = %reason,
    );
}

struct Connection {
    id: ConnectionId,
    router: Arc<EventRouter>,
    outbound: OutboundSender,
}

impl Connection {
    async fn read_loop(
        &self,
        mut stream: SplitStream<WebSocket>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> DisconnectReason {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => {
                        reply(&self.outbound, ServerMessage::Error {
                            message: "Binary messages are not supported".to_string(),
                        })
                        .await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return DisconnectReason::ClientClosed(frame.map(|f| f.code));
                    }
                    // Ping/pong are answered by the transport.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return DisconnectReason::Transport(e.to_string()),
                    None => return DisconnectReason::Transport("stream ended".to_string()),
                },
                _ = shutdown.recv() => return DisconnectReason::ServerShutdown,
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(
                    event = "CLIENT_FRAME_REJECTED",
                    connection_id = %self.id,
                    error = %e,
                );
                let err = RealtimeError::InvalidMessage(e.to_string());
                reply(&self.outbound, ServerMessage::Error { message: err.client_message() }).await;
                return;
            }
        };

        let response = match message {
            ClientMessage::SubscribeToTable(topic) => self.subscribe(topic),
            ClientMessage::RequestDataRefresh(topic) => self.refresh(topic).await,
            ClientMessage::WorkoutProgress(payload) => {
                self.relay(PeerUpdate::WorkoutProgress, payload)
            }
            ClientMessage::MealLogged(payload) => self.relay(PeerUpdate::MealLogged, payload),
        };

        if let Some(response) = response {
            reply(&self.outbound, response).await;
        }
    }

    fn subscribe(&self, topic: String) -> Option<ServerMessage> {
        match self.router.registry().subscribe(&self.id, &topic) {
            Ok(()) => {
                tracing::debug!(
                    event = "TOPIC_SUBSCRIBED",
                    connection_id = %self.id,
                    table = %topic,
                );
                Some(ServerMessage::SubscriptionConfirmed { table: topic })
            }
            Err(e) => Some(ServerMessage::SubscriptionError {
                message: e.client_message(),
            }),
        }
    }

    async fn refresh(&self, topic: String) -> Option<ServerMessage> {
        match self.router.handle_refresh(&self.id, &topic).await {
            Ok(data) => Some(ServerMessage::DataRefresh {
                table: topic,
                data,
                timestamp: Utc::now(),
            }),
            Err(e) => Some(ServerMessage::DataRefreshError {
                message: e.client_message(),
            }),
        }
    }

    fn relay(&self, kind: PeerUpdate, payload: serde_json::Value) -> Option<ServerMessage> {
        match self.router.relay_peer_update(&self.id, kind, payload) {
            Ok(_) => None,
            Err(e) => Some(ServerMessage::Error {
                message: e.client_message(),
            }),
        }
    }
}

/// Queue a direct reply. Waits for room rather than dropping it.
async fn reply(outbound: &OutboundSender, message: ServerMessage) {
    if outbound.send(Arc::new(message)).await.is_err() {
        tracing::debug!(event = "REPLY_DROPPED", kind = "closed");
    }
}

/// Drain the outbound queue into the socket; on a close signal send the
/// close frame and stop.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    mut close: oneshot::Receiver<CloseFrame<'static>>,
) {
    let mut close_open = true;
    loop {
        tokio::select! {
            biased;
            frame = &mut close, if close_open => {
                match frame {
                    Ok(frame) => {
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        return;
                    }
                    // Client-side close: flush what is queued, then stop.
                    Err(_) => close_open = false,
                }
            }
            message = outbound.recv() => {
                let Some(message) = message else { return };
                let text = match serde_json::to_string(&*message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(event = "MESSAGE_ENCODE_FAILED", error = %e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
        }
    }
}
