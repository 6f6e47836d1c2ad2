//! Metrics registry for rowcast
//!
//! - Counters only, monotonic, reset on process start
//! - Thread-safe, lock-free
//!
//! Gauges such as the live connection count are read from the connection
//! registry, not tracked here.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters
///
/// All counters use Relaxed ordering; exact cross-counter consistency is not
/// needed for reporting.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Handshakes that produced a session
    connections_accepted: AtomicU64,
    /// Sessions torn down
    connections_closed: AtomicU64,
    /// Handshakes refused by the authenticator
    auth_failures: AtomicU64,
    /// Notifications parsed into change events
    events_received: AtomicU64,
    /// Notifications dropped as malformed
    events_dropped: AtomicU64,
    /// Messages handed to a recipient queue
    messages_delivered: AtomicU64,
    /// Recipients skipped during a broadcast
    delivery_failures: AtomicU64,
    /// Refresh requests served or attempted
    refresh_requests: AtomicU64,
    /// Refresh requests that failed
    refresh_failures: AtomicU64,
    /// Same-user relays performed
    peer_relays: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub auth_failures: u64,
    pub events_received: u64,
    pub events_dropped: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
    pub refresh_requests: u64,
    pub refresh_failures: u64,
    pub peer_relays: u64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Connection metrics

    pub fn increment_connections_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connections_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Change feed metrics

    pub fn increment_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Delivery metrics

    pub fn add_messages_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_delivery_failures(&self, count: u64) {
        self.delivery_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_peer_relays(&self) {
        self.peer_relays.fetch_add(1, Ordering::Relaxed);
    }

    // Refresh metrics

    pub fn increment_refresh_requests(&self) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refresh_failures(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            refresh_requests: self.refresh_requests.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            peer_relays: self.peer_relays.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_zero() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment_connections_accepted();
        metrics.increment_connections_accepted();
        metrics.add_messages_delivered(5);
        metrics.add_delivery_failures(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_accepted, 2);
        assert_eq!(snap.messages_delivered, 5);
        assert_eq!(snap.delivery_failures, 1);
        assert_eq!(snap.auth_failures, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.increment_events_received();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.snapshot().events_received, 4000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsRegistry::new();
        metrics.increment_peer_relays();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["peer_relays"], 1);
    }
}
