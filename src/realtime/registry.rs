//! # Connection Registry
//!
//! Live sessions and room membership.
//!
//! ## Rooms
//! - `global`: every connection
//! - `<user_id>`: every connection of one user
//! - `<user_id>:<topic>`: connections of one user subscribed to one topic
//!
//! ## Invariant
//! Sessions and room membership live behind one lock. Structural changes
//! (register, subscribe, unregister) take it exclusively; a broadcast only
//! holds it shared while copying the member senders and delivers after
//! releasing it. A connection therefore never appears in a room once its
//! session is gone, and broadcasts do not block each other.
//!
//! Each member's sender sits in a slot that `unregister` empties before
//! returning. A broadcast that copied the slot earlier finds it empty and
//! skips the connection, so nothing is queued after `unregister` returns.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::errors::{DeliveryError, RealtimeError, RealtimeResult};
use super::message::ServerMessage;
use super::topics::AllowedTopics;
use crate::auth::Identity;
use crate::observability::MetricsRegistry;

/// Sending half of a connection's outbound queue
pub type OutboundSender = mpsc::Sender<Arc<ServerMessage>>;

/// Receiving half of a connection's outbound queue
pub type OutboundReceiver = mpsc::Receiver<Arc<ServerMessage>>;

/// Create an outbound queue for one connection
pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Opaque handle of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Logical delivery group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomId {
    Global,
    User(String),
    UserTopic { user_id: String, topic: String },
}

impl RoomId {
    pub fn user(user_id: impl Into<String>) -> Self {
        RoomId::User(user_id.into())
    }

    pub fn user_topic(user_id: impl Into<String>, topic: impl Into<String>) -> Self {
        RoomId::UserTopic {
            user_id: user_id.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Global => f.write_str("global"),
            RoomId::User(user_id) => f.write_str(user_id),
            RoomId::UserTopic { user_id, topic } => write!(f, "{}:{}", user_id, topic),
        }
    }
}

/// State of one authenticated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub user_label: String,
    pub subscribed_topics: BTreeSet<String>,
    pub connected_at: DateTime<Utc>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Members targeted
    pub recipients: usize,
    /// Messages queued
    pub delivered: usize,
    /// Members skipped
    pub failed: usize,
}

/// Registry-side handle on a connection's outbound queue
#[derive(Clone)]
struct OutboundSlot(Arc<Mutex<Option<OutboundSender>>>);

impl OutboundSlot {
    fn new(outbound: OutboundSender) -> Self {
        Self(Arc::new(Mutex::new(Some(outbound))))
    }

    fn try_deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        let slot = self.0.lock().map_err(|_| DeliveryError::Closed)?;
        let outbound = slot.as_ref().ok_or(DeliveryError::Closed)?;
        outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Waits out any delivery in progress, then refuses all later ones.
    fn close(&self) {
        match self.0.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

struct Member {
    session: Session,
    outbound: OutboundSlot,
}

#[derive(Default)]
struct RegistryState {
    members: HashMap<ConnectionId, Member>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn join(&mut self, room: RoomId, id: ConnectionId) {
        self.rooms.entry(room).or_default().insert(id);
    }

    fn leave(&mut self, room: &RoomId, id: &ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Registry of live connections and their rooms
pub struct ConnectionRegistry {
    allowed: Arc<AllowedTopics>,
    metrics: Arc<MetricsRegistry>,
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new(allowed: Arc<AllowedTopics>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            allowed,
            metrics,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn allowed_topics(&self) -> &AllowedTopics {
        &self.allowed
    }

    /// Admit an authenticated connection and join its default rooms
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: OutboundSender,
    ) -> RealtimeResult<Session> {
        let mut state = self
            .state
            .write()
            .map_err(|_| RealtimeError::Internal("Lock poisoned".into()))?;

        if state.members.contains_key(&connection_id) {
            return Err(RealtimeError::Internal(format!(
                "connection {} already registered",
                connection_id
            )));
        }

        let session = Session {
            connection_id,
            user_id: identity.user_id,
            user_label: identity.user_label,
            subscribed_topics: BTreeSet::new(),
            connected_at: Utc::now(),
        };

        state.join(RoomId::Global, connection_id);
        state.join(RoomId::user(session.user_id.clone()), connection_id);
        state.members.insert(
            connection_id,
            Member {
                session: session.clone(),
                outbound: OutboundSlot::new(outbound),
            },
        );
        drop(state);

        self.metrics.increment_connections_accepted();
        tracing::debug!(
            event = "SESSION_REGISTERED",
            connection_id = %connection_id,
            user_id = %session.user_id,
        );

        Ok(session)
    }

    /// Join the per-(user, topic) room. Unknown topics change nothing.
    pub fn subscribe(&self, connection_id: &ConnectionId, topic: &str) -> RealtimeResult<()> {
        let topic = self.allowed.validate(topic)?;

        let mut state = self
            .state
            .write()
            .map_err(|_| RealtimeError::Internal("Lock poisoned".into()))?;

        let member = state
            .members
            .get_mut(connection_id)
            .ok_or_else(|| RealtimeError::UnknownConnection(connection_id.to_string()))?;

        member.session.subscribed_topics.insert(topic.to_string());
        let room = RoomId::user_topic(member.session.user_id.clone(), topic);
        state.join(room, *connection_id);

        Ok(())
    }

    /// Remove a connection from every room and drop its session.
    ///
    /// Idempotent: returns `None` if the connection is already gone.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Session> {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(_) => {
                tracing::error!(event = "REGISTRY_POISONED", connection_id = %connection_id);
                return None;
            }
        };

        let member = state.members.remove(connection_id)?;
        member.outbound.close();
        let session = member.session;

        state.leave(&RoomId::Global, connection_id);
        state.leave(&RoomId::user(session.user_id.clone()), connection_id);
        for topic in &session.subscribed_topics {
            state.leave(
                &RoomId::user_topic(session.user_id.clone(), topic.clone()),
                connection_id,
            );
        }
        drop(state);

        self.metrics.increment_connections_closed();
        tracing::debug!(
            event = "SESSION_UNREGISTERED",
            connection_id = %connection_id,
            user_id = %session.user_id,
        );

        Some(session)
    }

    /// Deliver a message to every member of a room
    pub fn broadcast(&self, room: &RoomId, message: ServerMessage) -> DeliveryReport {
        self.deliver(room, message, None)
    }

    /// Deliver to every member of a room except one connection
    pub fn broadcast_except(
        &self,
        room: &RoomId,
        message: ServerMessage,
        excluded: &ConnectionId,
    ) -> DeliveryReport {
        self.deliver(room, message, Some(excluded))
    }

    fn deliver(
        &self,
        room: &RoomId,
        message: ServerMessage,
        excluded: Option<&ConnectionId>,
    ) -> DeliveryReport {
        let targets = self.snapshot_members(room, excluded);
        let mut report = DeliveryReport {
            recipients: targets.len(),
            ..DeliveryReport::default()
        };
        if targets.is_empty() {
            return report;
        }

        let message = Arc::new(message);
        for (id, outbound) in targets {
            match outbound.try_deliver(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Closed) => {
                    report.failed += 1;
                    tracing::debug!(
                        event = "DELIVERY_SKIPPED",
                        connection_id = %id,
                        room = %room,
                        reason = "closed",
                    );
                }
                Err(DeliveryError::Lagging) => {
                    report.failed += 1;
                    tracing::warn!(
                        event = "DELIVERY_SKIPPED",
                        connection_id = %id,
                        room = %room,
                        reason = "lagging",
                        kind = message.event_name(),
                    );
                }
            }
        }

        self.metrics.add_messages_delivered(report.delivered as u64);
        self.metrics.add_delivery_failures(report.failed as u64);
        report
    }

    fn snapshot_members(
        &self,
        room: &RoomId,
        excluded: Option<&ConnectionId>,
    ) -> Vec<(ConnectionId, OutboundSlot)> {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => {
                tracing::error!(event = "REGISTRY_POISONED", room = %room);
                return Vec::new();
            }
        };

        let Some(ids) = state.rooms.get(room) else {
            return Vec::new();
        };

        ids.iter()
            .filter(|id| excluded != Some(*id))
            .filter_map(|id| state.members.get(id).map(|m| (*id, m.outbound.clone())))
            .collect()
    }

    /// Copy of a live session
    pub fn session(&self, connection_id: &ConnectionId) -> Option<Session> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.members.get(connection_id).map(|m| m.session.clone()))
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.state.read().map(|s| s.members.len()).unwrap_or(0)
    }

    /// Names of all non-empty rooms, sorted
    pub fn room_ids(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .state
            .read()
            .map(|s| s.rooms.keys().map(RoomId::to_string).collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Current members of a room
    pub fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .state
            .read()
            .ok()
            .and_then(|s| s.rooms.get(room).map(|m| m.iter().copied().collect()))
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Rooms a connection currently belongs to, sorted
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .state
            .read()
            .map(|s| {
                s.rooms
                    .iter()
                    .filter(|(_, members)| members.contains(connection_id))
                    .map(|(room, _)| room.clone())
                    .collect()
            })
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Connection ids of every live session
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state
            .read()
            .map(|s| s.members.keys().copied().collect())
            .unwrap_or_default()
    }
}
