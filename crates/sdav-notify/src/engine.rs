//! The subscription table and event dispatch.

use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::pattern::{Pattern, PatternError};
use crate::protocol::ServerMessage;
use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use sdav_core::ChangeEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

static OBSERVER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a connected observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        Self(OBSERVER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client_{}", self.0)
    }
}

/// A notification could not be handed to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("observer connection is closed")]
    Closed,

    #[error("observer outbound queue is full")]
    Backlogged,
}

/// Where the engine hands notifications. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, observer: ObserverId, message: ServerMessage) -> Result<(), DeliveryError>;
}

/// Result of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Added(Pattern),
    AlreadySubscribed(Pattern),
    Rejected(PatternError),
}

/// Result of an unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed(Pattern),
    NotSubscribed,
    Rejected(PatternError),
}

/// What one dispatch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Matching (observer, pattern) pairs.
    pub matches: usize,
    /// Notifications accepted by the sink.
    pub delivered: usize,
    /// Observers torn down because delivery failed.
    pub failed: Vec<ObserverId>,
}

/// Owns every observer's pattern set and fans change events out to them.
///
/// Each observer appears at most once; removing its last pattern removes the
/// entry. The lock is never held while the sink is called.
pub struct SubscriptionEngine {
    subscriptions: Mutex<HashMap<ObserverId, Vec<Pattern>>>,
    metrics: EngineMetrics,
    sink: Arc<dyn NotificationSink>,
}

impl SubscriptionEngine {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            metrics: EngineMetrics::new(),
            sink,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ObserverId, Vec<Pattern>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a pattern for `observer`.
    pub fn subscribe(&self, observer: ObserverId, raw: &str) -> SubscribeOutcome {
        let pattern = match Pattern::parse(raw) {
            Ok(pattern) => pattern,
            Err(e) => {
                debug!("{} subscription to {:?} rejected: {}", observer, raw, e);
                return SubscribeOutcome::Rejected(e);
            }
        };

        let mut table = self.table();
        let patterns = table.entry(observer).or_default();
        if patterns.contains(&pattern) {
            return SubscribeOutcome::AlreadySubscribed(pattern);
        }
        patterns.push(pattern.clone());
        info!("{} subscribed to {}", observer, pattern);
        SubscribeOutcome::Added(pattern)
    }

    /// Remove a pattern. The raw text is normalized the same way as on
    /// subscribe, so `/docs/` removes `/docs`.
    pub fn unsubscribe(&self, observer: ObserverId, raw: &str) -> UnsubscribeOutcome {
        let pattern = match Pattern::parse(raw) {
            Ok(pattern) => pattern,
            Err(e) => return UnsubscribeOutcome::Rejected(e),
        };

        let mut table = self.table();
        let Some(patterns) = table.get_mut(&observer) else {
            return UnsubscribeOutcome::NotSubscribed;
        };
        let Some(idx) = patterns.iter().position(|p| *p == pattern) else {
            return UnsubscribeOutcome::NotSubscribed;
        };
        patterns.remove(idx);
        if patterns.is_empty() {
            table.remove(&observer);
        }
        info!("{} unsubscribed from {}", observer, pattern);
        UnsubscribeOutcome::Removed(pattern)
    }

    /// Drop every pattern held by `observer`. Safe to call repeatedly.
    pub fn unsubscribe_all(&self, observer: ObserverId) -> usize {
        let removed = self.table().remove(&observer).map_or(0, |p| p.len());
        if removed > 0 {
            debug!("{} released {} subscription(s)", observer, removed);
        }
        removed
    }

    /// Patterns held by `observer`, in subscription order.
    pub fn patterns(&self, observer: ObserverId) -> Vec<String> {
        self.table()
            .get(&observer)
            .map(|patterns| patterns.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self, observer: ObserverId) -> usize {
        self.table().get(&observer).map_or(0, Vec::len)
    }

    /// Observers holding at least one pattern.
    pub fn observer_count(&self) -> usize {
        self.table().len()
    }

    /// Patterns held across all observers.
    pub fn active_subscriptions(&self) -> usize {
        self.table().values().map(Vec::len).sum()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let (subscriptions, observers) = {
            let table = self.table();
            (table.values().map(Vec::len).sum(), table.len())
        };
        self.metrics.snapshot(subscriptions, observers)
    }

    /// Deliver `event` to every matching observer.
    ///
    /// One notification is sent per matching pattern, so an observer holding
    /// two overlapping patterns receives it twice. An observer whose
    /// delivery fails is unsubscribed from everything.
    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchReport {
        self.metrics.record_event();

        let targets: Vec<(ObserverId, usize)> = {
            let table = self.table();
            table
                .iter()
                .map(|(observer, patterns)| {
                    let hits = patterns
                        .iter()
                        .filter(|p| p.matches(&event.relative_path))
                        .count();
                    (*observer, hits)
                })
                .filter(|(_, hits)| *hits > 0)
                .collect()
        };

        let mut report = DispatchReport::default();
        if targets.is_empty() {
            return report;
        }

        let message = file_change_message(event);
        for (observer, hits) in targets {
            report.matches += hits;
            for _ in 0..hits {
                match self.sink.deliver(observer, message.clone()) {
                    Ok(()) => {
                        self.metrics.record_delivery();
                        report.delivered += 1;
                    }
                    Err(e) => {
                        warn!("Dropping {} after failed delivery: {}", observer, e);
                        report.failed.push(observer);
                        break;
                    }
                }
            }
        }
        self.metrics.record_matches(report.matches as u64);

        for observer in &report.failed {
            self.unsubscribe_all(*observer);
        }

        debug!(
            "{} {} matched {} pattern(s), {} delivered",
            event.kind, event.relative_path, report.matches, report.delivered
        );
        report
    }
}

fn file_change_message(event: &ChangeEvent) -> ServerMessage {
    ServerMessage::FileChange {
        event_type: event.kind,
        path: event.relative_path.clone(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        size: event.size,
        mime_type: event.mime_hint.map(str::to_string),
    }
}
