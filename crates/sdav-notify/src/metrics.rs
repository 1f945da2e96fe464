use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Engine counters. Mutated only on the dispatch path.
#[derive(Debug)]
pub struct EngineMetrics {
    file_events: AtomicU64,
    notifications_sent: AtomicU64,
    matches_found: AtomicU64,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Point-in-time view of the engine, as sent in `metrics` replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_file_events: u64,
    pub total_notifications_sent: u64,
    pub total_matches_found: u64,
    pub start_time: DateTime<Utc>,
    /// Milliseconds since start.
    pub uptime: u64,
    pub active_subscriptions: usize,
    pub active_clients: usize,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            file_events: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            matches_found: AtomicU64::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub(crate) fn record_event(&self) {
        self.file_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_matches(&self, count: u64) {
        self.matches_found.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_subscriptions: usize, active_clients: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            total_file_events: self.file_events.load(Ordering::Relaxed),
            total_notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            total_matches_found: self.matches_found.load(Ordering::Relaxed),
            start_time: self.started_at,
            uptime: self.started.elapsed().as_millis() as u64,
            active_subscriptions,
            active_clients,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
