//! # sdav-notify
//!
//! Real-time change notifications for the sdav file server.
//!
//! Observers connect over a WebSocket, authenticate with the shared
//! credential, and subscribe to path patterns (`/`, `/docs/report.txt`,
//! `/docs/*`, `/docs/**`). Every change, whether made through WebDAV or
//! directly on disk, flows through a single [`ChangeNotifier`] into the
//! [`SubscriptionEngine`], which sends one `fileChange` message per matching
//! pattern.
//!
//! ```text
//!  WebDAV write ──┐
//!                 ├─> ChangeNotifier ─> SubscriptionEngine ─> SessionRegistry ─> run_session
//!  FsWatcher ─────┘    (echo, settle)     (patterns, metrics)    (bounded queues)    (WebSocket)
//! ```

mod engine;
mod metrics;
mod notifier;
mod pattern;
mod protocol;
mod session;
mod source;
mod watcher;

pub use engine::{
    DeliveryError, DispatchReport, NotificationSink, ObserverId, SubscribeOutcome,
    SubscriptionEngine, UnsubscribeOutcome,
};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use notifier::{ChangeNotifier, WriteGuard};
pub use pattern::{Pattern, PatternError};
pub use protocol::{ClientInfo, ClientMessage, ProtocolError, ServerMessage};
pub use session::{
    run_session, Heartbeat, HeartbeatAction, Session, SessionContext, SessionRegistry,
    SessionState,
};
pub use source::{RawEvent, RawKind, SourceAdapter};
pub use watcher::{coalesce, translate, FsWatcher, WatchError};
