//! Hub metrics.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters maintained by the hub supervisor and read concurrently by
/// pollers. Connection and message counts are atomics; the per-type map
/// sits behind a lock since broadcasts touch it once per message, not
/// per client.
pub struct HubMetrics {
    current_connections: AtomicU64,
    total_connections: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    message_types: Mutex<HashMap<String, u64>>,
    started: Instant,
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self {
            current_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            message_types: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_opened(&self) {
        self.current_connections.fetch_add(1, Ordering::SeqCst);
        self.total_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn connection_closed(&self) {
        self.current_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_type(&self, kind: &str) {
        *self.message_types.lock().entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn current_connections(&self) -> u64 {
        self.current_connections.load(Ordering::SeqCst)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::SeqCst)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn type_count(&self, kind: &str) -> u64 {
        self.message_types.lock().get(kind).copied().unwrap_or(0)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// JSON view for monitoring endpoints.
    pub fn snapshot(&self) -> Value {
        let uptime = self.uptime().as_secs_f64().max(f64::EPSILON);
        let sent = self.messages_sent();
        serde_json::json!({
            "current_connections": self.current_connections(),
            "total_connections": self.total_connections(),
            "messages_sent": sent,
            "messages_received": self.messages_received(),
            "message_types": self.message_types.lock().clone(),
            "uptime_secs": self.uptime().as_secs(),
            "sent_per_sec": sent as f64 / uptime,
        })
    }
}
