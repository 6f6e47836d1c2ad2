//! # Event Router
//!
//! Decides who hears about what.
//!
//! - Database changes: full payload to the owner's room, a content-free cue
//!   to the global room. No payload crosses users.
//! - Refresh: owner-scoped pull from the row store, bounded in size and time.
//! - Peer relay: one user's device to that user's other devices.
//!
//! Delivery is best-effort (no retries, no replay).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;
use super::message::{PeerUpdate, ServerMessage};
use super::registry::{ConnectionId, ConnectionRegistry, DeliveryReport, RoomId};
use crate::observability::MetricsRegistry;
use crate::store::RowStore;

/// Bounds on refresh queries
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Maximum rows returned
    pub limit: usize,
    /// Maximum time spent in the store
    pub timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Result of dispatching one change event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Owner-room delivery, if the event had an owner
    pub owner: Option<DeliveryReport>,
    /// Global-room delivery
    pub global: DeliveryReport,
}

pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn RowStore>,
    refresh: RefreshPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn RowStore>,
        refresh: RefreshPolicy,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            store,
            refresh,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    /// Fan a change event out to its owner and to everyone.
    ///
    /// The global cue goes out for every event, whoever is subscribed.
    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchOutcome {
        let owner = event.owner_id.as_deref().filter(|o| !o.is_empty()).map(|owner| {
            self.registry.broadcast(
                &RoomId::user(owner),
                ServerMessage::DatabaseChange {
                    table: event.topic.clone(),
                    action: event.action,
                    data: event.payload.clone(),
                },
            )
        });

        let global = self.registry.broadcast(
            &RoomId::Global,
            ServerMessage::GlobalUpdate {
                kind: event.topic.clone(),
                action: event.action,
                timestamp: Utc::now(),
            },
        );

        tracing::debug!(
            event = "CHANGE_DISPATCHED",
            table = %event.topic,
            action = %event.action,
            owner_delivered = owner.map(|r| r.delivered).unwrap_or(0),
            global_delivered = global.delivered,
        );

        DispatchOutcome { owner, global }
    }

    /// Newest rows of `topic` owned by the requesting connection's user
    pub async fn handle_refresh(
        &self,
        connection_id: &ConnectionId,
        topic: &str,
    ) -> RealtimeResult<Vec<Value>> {
        self.metrics.increment_refresh_requests();

        let result = self.query_recent(connection_id, topic).await;
        if let Err(e) = &result {
            self.metrics.increment_refresh_failures();
            match e {
                RealtimeError::QueryFailed(_) => tracing::error!(
                    event = "REFRESH_FAILED",
                    connection_id = %connection_id,
                    table = %topic,
                    error = %e,
                ),
                _ => tracing::debug!(
                    event = "REFRESH_REJECTED",
                    connection_id = %connection_id,
                    table = %topic,
                    error = %e,
                ),
            }
        }
        result
    }

    async fn query_recent(
        &self,
        connection_id: &ConnectionId,
        topic: &str,
    ) -> RealtimeResult<Vec<Value>> {
        let topic = self.registry.allowed_topics().validate(topic)?;
        let session = self
            .registry
            .session(connection_id)
            .ok_or_else(|| RealtimeError::UnknownConnection(connection_id.to_string()))?;

        let query = self
            .store
            .recent_rows(topic, &session.user_id, self.refresh.limit);

        match tokio::time::timeout(self.refresh.timeout, query).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => Err(RealtimeError::QueryFailed(e.to_string())),
            Err(_) => Err(RealtimeError::QueryFailed(format!(
                "timed out after {}ms",
                self.refresh.timeout.as_millis()
            ))),
        }
    }

    /// Echo a client update to the sender's other connections
    pub fn relay_peer_update(
        &self,
        connection_id: &ConnectionId,
        kind: PeerUpdate,
        payload: Value,
    ) -> RealtimeResult<DeliveryReport> {
        let session = self
            .registry
            .session(connection_id)
            .ok_or_else(|| RealtimeError::UnknownConnection(connection_id.to_string()))?;

        let message = kind.into_message(payload, &session.user_id, Utc::now());
        let report = self.registry.broadcast_except(
            &RoomId::user(session.user_id.clone()),
            message,
            connection_id,
        );

        self.metrics.increment_peer_relays();
        tracing::debug!(
            event = "PEER_RELAYED",
            kind = kind.as_str(),
            user_id = %session.user_id,
            delivered = report.delivered,
        );

        Ok(report)
    }

    /// Dispatch events from the listener until the channel closes
    pub async fn run_dispatch_loop(self: Arc<Self>, mut events: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        tracing::info!(event = "DISPATCH_LOOP_STOPPED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::realtime::event::Action;
    use crate::realtime::registry::{outbound_channel, OutboundReceiver};
    use crate::realtime::topics::AllowedTopics;
    use crate::store::{MemoryRowStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingStore;

    #[async_trait]
    impl RowStore for FailingStore {
        async fn recent_rows(&self, _: &str, _: &str, _: usize) -> StoreResult<Vec<Value>> {
            Err(StoreError::Query("boom".into()))
        }

        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Connection("down".into()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl RowStore for SlowStore {
        async fn recent_rows(&self, _: &str, _: &str, _: usize) -> StoreResult<Vec<Value>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    fn router_with(store: Arc<dyn RowStore>, timeout: Duration) -> EventRouter {
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(AllowedTopics::new(["workouts", "meals", "grocery_lists"])),
            Arc::clone(&metrics),
        ));
        EventRouter::new(
            registry,
            store,
            RefreshPolicy { limit: 10, timeout },
            metrics,
        )
    }

    fn connect(router: &EventRouter, user: &str) -> (ConnectionId, OutboundReceiver) {
        let id = ConnectionId::new();
        let (tx, rx) = outbound_channel(32);
        router
            .registry()
            .register(
                id,
                Identity {
                    user_id: user.to_string(),
                    user_label: user.to_string(),
                },
                tx,
            )
            .unwrap();
        (id, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    #[test]
    fn test_dispatch_two_tier() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let (_u, mut u_rx) = connect(&router, "u");
        let (_v, mut v_rx) = connect(&router, "v");

        let event = ChangeEvent::new("workouts", Action::Insert, Some("u".into()), json!({"id": 1}));
        let outcome = router.dispatch(&event);

        assert_eq!(outcome.owner.unwrap().delivered, 1);
        assert_eq!(outcome.global.delivered, 2);

        let u_msgs = drain(&mut u_rx);
        assert_eq!(u_msgs.len(), 2);
        assert_eq!(
            u_msgs[0],
            ServerMessage::DatabaseChange {
                table: "workouts".into(),
                action: Action::Insert,
                data: json!({"id": 1}),
            }
        );
        assert_eq!(u_msgs[1].event_name(), "global_update");

        let v_msgs = drain(&mut v_rx);
        assert_eq!(v_msgs.len(), 1);
        assert!(matches!(
            &v_msgs[0],
            ServerMessage::GlobalUpdate { kind, action: Action::Insert, .. } if kind == "workouts"
        ));
    }

    #[test]
    fn test_dispatch_without_owner_is_global_only() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let (_u, mut u_rx) = connect(&router, "u");

        let event = ChangeEvent::new("meals", Action::Delete, None, json!({"id": 9}));
        let outcome = router.dispatch(&event);

        assert!(outcome.owner.is_none());
        let msgs = drain(&mut u_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event_name(), "global_update");
    }

    #[test]
    fn test_dispatch_with_no_clients() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let event = ChangeEvent::new("meals", Action::Update, Some("ghost".into()), json!({}));
        let outcome = router.dispatch(&event);
        assert_eq!(outcome.owner, Some(DeliveryReport::default()));
        assert_eq!(outcome.global, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_refresh_scoped_to_requester() {
        let store = Arc::new(MemoryRowStore::new());
        store.insert("meals", "a", json!({"owner": "a"})).unwrap();
        store.insert("meals", "b", json!({"owner": "b"})).unwrap();
        let router = router_with(store, Duration::from_secs(1));
        let (a, _rx) = connect(&router, "a");

        let rows = router.handle_refresh(&a, "meals").await.unwrap();
        assert_eq!(rows, vec![json!({"owner": "a"})]);
    }

    #[tokio::test]
    async fn test_refresh_empty_is_ok() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let (a, _rx) = connect(&router, "a");

        let rows = router.handle_refresh(&a, "grocery_lists").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_invalid_topic() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let (a, _rx) = connect(&router, "a");

        let result = router.handle_refresh(&a, "users").await;
        assert!(matches!(result, Err(RealtimeError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_refresh_store_failure() {
        let router = router_with(Arc::new(FailingStore), Duration::from_secs(1));
        let (a, _rx) = connect(&router, "a");

        let result = router.handle_refresh(&a, "meals").await;
        assert!(matches!(result, Err(RealtimeError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn test_refresh_times_out() {
        let router = router_with(Arc::new(SlowStore), Duration::from_millis(20));
        let (a, _rx) = connect(&router, "a");

        let result = router.handle_refresh(&a, "meals").await;
        assert!(matches!(result, Err(RealtimeError::QueryFailed(m)) if m.contains("timed out")));
    }

    #[test]
    fn test_relay_excludes_sender() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let (phone, mut phone_rx) = connect(&router, "u");
        let (_watch, mut watch_rx) = connect(&router, "u");
        let (_other, mut other_rx) = connect(&router, "v");

        let report = router
            .relay_peer_update(&phone, PeerUpdate::WorkoutProgress, json!({"set": 3}))
            .unwrap();
        assert_eq!(report.delivered, 1);

        assert!(drain(&mut phone_rx).is_empty());
        assert!(drain(&mut other_rx).is_empty());
        let msgs = drain(&mut watch_rx);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            ServerMessage::WorkoutProgressUpdate(v) => {
                assert_eq!(v["set"], 3);
                assert_eq!(v["userId"], "u");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_relay_unknown_connection() {
        let router = router_with(Arc::new(MemoryRowStore::new()), Duration::from_secs(1));
        let result = router.relay_peer_update(&ConnectionId::new(), PeerUpdate::MealLogged, json!({}));
        assert!(matches!(result, Err(RealtimeError::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_dispatch_loop_drains_channel() {
        let router = Arc::new(router_with(
            Arc::new(MemoryRowStore::new()),
            Duration::from_secs(1),
        ));
        let (_u, mut u_rx) = connect(&router, "u");
        let (tx, rx) = mpsc::channel(8);

        let handle = tokio::spawn(Arc::clone(&router).run_dispatch_loop(rx));
        tx.send(ChangeEvent::new("meals", Action::Insert, Some("u".into()), json!({})))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        let msgs = drain(&mut u_rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].event_name(), "database_change");
    }
}
