//! Observability and Metrics
//!
//! Counters for monitoring one world (server or client): connection churn, message
//! traffic, dispatch drops and spawn activity.
//!
//! Uses atomic counters so a snapshot can be read from another thread (e.g. a
//! status endpoint) while the owning world keeps writing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one world
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections refused because the table was full
    pub connections_rejected: AtomicU64,
    /// Total messages sent
    pub messages_sent: AtomicU64,
    /// Total messages received and dispatched to a handler
    pub messages_received: AtomicU64,
    /// Total bytes sent, headers included
    pub bytes_sent: AtomicU64,
    /// Total bytes received from the transport
    pub bytes_received: AtomicU64,
    /// Length headers outside the configured bound
    pub framing_violations: AtomicU64,
    /// Messages without a registered handler
    pub unknown_messages: AtomicU64,
    /// Gated messages from unauthenticated connections
    pub unauthenticated_drops: AtomicU64,
    /// Payloads that failed to decode
    pub malformed_messages: AtomicU64,
    /// Handlers that returned an error
    pub handler_errors: AtomicU64,
    /// Entities added to the spawn directory
    pub entities_spawned: AtomicU64,
    /// Entities removed from the spawn directory
    pub entities_despawned: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            framing_violations: AtomicU64::new(0),
            unknown_messages: AtomicU64::new(0),
            unauthenticated_drops: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            entities_spawned: AtomicU64::new(0),
            entities_despawned: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection refused at the door
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a handled message
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record raw bytes arriving from the transport
    pub fn bytes_received(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a framing violation
    pub fn framing_violation(&self) {
        self.framing_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message without handler
    pub fn unknown_message(&self) {
        self.unknown_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a gated message dropped for lack of authentication
    pub fn unauthenticated_drop(&self) {
        self.unauthenticated_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload that failed to decode
    pub fn malformed_message(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failing handler
    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a spawn
    pub fn entity_spawned(&self) {
        self.entities_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a despawn
    pub fn entity_despawned(&self) {
        self.entities_despawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            framing_violations: self.framing_violations.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            unauthenticated_drops: self.unauthenticated_drops.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            entities_spawned: self.entities_spawned.load(Ordering::Relaxed),
            entities_despawned: self.entities_despawned.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            framing_violations = snapshot.framing_violations,
            unknown_messages = snapshot.unknown_messages,
            unauthenticated_drops = snapshot.unauthenticated_drops,
            malformed_messages = snapshot.malformed_messages,
            handler_errors = snapshot.handler_errors,
            entities_spawned = snapshot.entities_spawned,
            entities_despawned = snapshot.entities_despawned,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub framing_violations: u64,
    pub unknown_messages: u64,
    pub unauthenticated_drops: u64,
    pub malformed_messages: u64,
    pub handler_errors: u64,
    pub entities_spawned: u64,
    pub entities_despawned: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
    }

    #[test]
    fn test_message_counters() {
        let metrics = Metrics::new();
        metrics.message_sent(16);
        metrics.message_sent(4);
        metrics.bytes_received(9);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.bytes_sent, 20);
        assert_eq!(snap.bytes_received, 9);
    }
}
