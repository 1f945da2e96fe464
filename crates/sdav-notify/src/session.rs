//! Observer sessions over a WebSocket.
//!
//! A [`Session`] is the transport-independent state machine; [`run_session`]
//! drives one over a `tokio-tungstenite` stream.

use crate::engine::{
    DeliveryError, NotificationSink, ObserverId, SubscribeOutcome, SubscriptionEngine,
    UnsubscribeOutcome,
};
use crate::pattern::PatternError;
use crate::protocol::{ClientInfo, ClientMessage, ServerMessage};
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use sdav_core::CredentialValidator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Outbound queues of every live session, keyed by observer.
///
/// This is the engine's [`NotificationSink`]: a full or closed queue is a
/// delivery failure.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ObserverId, mpsc::Sender<ServerMessage>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<ServerMessage>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the outbound queue for `observer`.
    pub fn register(&self, observer: ObserverId, capacity: usize) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.lock().insert(observer, tx);
        rx
    }

    /// Forget `observer`. Returns whether it was present.
    pub fn remove(&self, observer: ObserverId) -> bool {
        self.lock().remove(&observer).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl NotificationSink for SessionRegistry {
    fn deliver(&self, observer: ObserverId, message: ServerMessage) -> Result<(), DeliveryError> {
        let sessions = self.lock();
        let Some(tx) = sessions.get(&observer) else {
            return Err(DeliveryError::Closed);
        };
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<SubscriptionEngine>,
    pub registry: Arc<SessionRegistry>,
    pub validator: Arc<dyn CredentialValidator>,
    pub heartbeat_interval: Duration,
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticated,
    Closed,
}

/// Per-connection protocol state.
pub struct Session {
    id: ObserverId,
    state: SessionState,
    connected_at: DateTime<Utc>,
    welcomed: bool,
    engine: Arc<SubscriptionEngine>,
    validator: Arc<dyn CredentialValidator>,
}

impl Session {
    /// Start a session. `pre_authenticated` is true when the upgrade request
    /// carried a valid `Authorization` header. Returns the greeting.
    pub fn open(
        id: ObserverId,
        engine: Arc<SubscriptionEngine>,
        validator: Arc<dyn CredentialValidator>,
        pre_authenticated: bool,
    ) -> (Self, ServerMessage) {
        let mut session = Self {
            id,
            state: SessionState::Connected,
            connected_at: Utc::now(),
            welcomed: false,
            engine,
            validator,
        };
        let greeting = if pre_authenticated {
            session.state = SessionState::Authenticated;
            session.welcome()
        } else {
            ServerMessage::AuthRequired {
                message: "Authentication required. Send an authenticate message with username and password.".to_string(),
            }
        };
        (session, greeting)
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    fn welcome(&mut self) -> ServerMessage {
        self.welcomed = true;
        ServerMessage::Connected {
            message: format!("Connected to SDAV notification server as {}", self.id),
        }
    }

    /// Handle one text frame.
    pub fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(message),
            Err(e) => {
                debug!("{} sent an unusable frame: {}", self.id, e);
                vec![ServerMessage::Error {
                    message: e.to_string(),
                }]
            }
        }
    }

    /// Handle one command and return the replies, in order.
    pub fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        let reply = match message {
            ClientMessage::Authenticate { username, password } => {
                return self.authenticate(username, password)
            }
            _ if !self.is_authenticated() => ServerMessage::AuthRequired {
                message: "Authentication required. Please authenticate first.".to_string(),
            },
            ClientMessage::Subscribe { path } => self.subscribe(path),
            ClientMessage::Unsubscribe { path } => self.unsubscribe(path),
            ClientMessage::GetSubscriptions => ServerMessage::SubscriptionsList {
                subscriptions: self.engine.patterns(self.id),
            },
            ClientMessage::GetMetrics => ServerMessage::Metrics {
                metrics: self.engine.metrics_snapshot(),
            },
            ClientMessage::GetClientInfo => ServerMessage::ClientInfo {
                client_info: self.client_info(),
            },
        };
        vec![reply]
    }

    fn authenticate(&mut self, username: Option<String>, password: Option<String>) -> Vec<ServerMessage> {
        let (Some(username), Some(password)) = (username, password) else {
            return vec![ServerMessage::AuthError {
                message: "Username and password are required".to_string(),
            }];
        };
        if username.is_empty() || password.is_empty() {
            return vec![ServerMessage::AuthError {
                message: "Username and password are required".to_string(),
            }];
        }

        if !self.validator.validate(&username, &password) {
            warn!("{} failed authentication as {:?}", self.id, username);
            return vec![ServerMessage::AuthFailed {
                message: "Invalid credentials".to_string(),
            }];
        }

        if !self.is_authenticated() {
            self.state = SessionState::Authenticated;
            info!("{} authenticated as {:?}", self.id, username);
        }
        let mut replies = vec![ServerMessage::AuthSuccess {
            message: "Authentication successful".to_string(),
        }];
        if !self.welcomed {
            replies.push(self.welcome());
        }
        replies
    }

    fn subscribe(&mut self, path: Option<Value>) -> ServerMessage {
        let raw = match requested_pattern(path) {
            Ok(raw) => raw,
            Err(path) => {
                return ServerMessage::SubscriptionError {
                    path,
                    message: format!("Subscription failed: {}", PatternError::Invalid),
                }
            }
        };
        match self.engine.subscribe(self.id, &raw) {
            SubscribeOutcome::Added(pattern) => ServerMessage::SubscriptionConfirmed {
                message: format!("Successfully subscribed to {pattern}"),
                path: pattern.to_string(),
            },
            SubscribeOutcome::AlreadySubscribed(pattern) => ServerMessage::SubscriptionInfo {
                message: format!("Already subscribed to {pattern}"),
                path: pattern.to_string(),
            },
            SubscribeOutcome::Rejected(e) => ServerMessage::SubscriptionError {
                path: Value::String(raw),
                message: format!("Subscription failed: {e}"),
            },
        }
    }

    fn unsubscribe(&mut self, path: Option<Value>) -> ServerMessage {
        let raw = match path {
            Some(Value::String(raw)) => raw,
            other => {
                return ServerMessage::UnsubscriptionError {
                    path: other.unwrap_or(Value::Null),
                    message: "Unsubscribe requires a path".to_string(),
                }
            }
        };
        match self.engine.unsubscribe(self.id, &raw) {
            UnsubscribeOutcome::Removed(pattern) => ServerMessage::UnsubscriptionConfirmed {
                message: format!("Successfully unsubscribed from {pattern}"),
                path: pattern.to_string(),
            },
            UnsubscribeOutcome::NotSubscribed => ServerMessage::UnsubscriptionError {
                message: format!("Not subscribed to {raw}"),
                path: Value::String(raw),
            },
            UnsubscribeOutcome::Rejected(e) => ServerMessage::UnsubscriptionError {
                path: Value::String(raw),
                message: format!("Unsubscription failed: {e}"),
            },
        }
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.to_string(),
            connected_at: self.connected_at,
            authenticated: self.is_authenticated(),
            subscription_count: self.engine.subscription_count(self.id),
        }
    }

    /// Release every subscription. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.engine.unsubscribe_all(self.id);
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Missing or null subscribes to the root; anything but a string is invalid.
fn requested_pattern(path: Option<Value>) -> Result<String, Value> {
    match path {
        None | Some(Value::Null) => Ok("/".to_string()),
        Some(Value::String(raw)) => Ok(raw),
        Some(other) => Err(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a probe and wait for the next tick.
    Probe,
    /// No acknowledgment since the last probe.
    Expire,
}

/// Liveness flag: cleared on each probe, set by each acknowledgment.
#[derive(Debug)]
pub struct Heartbeat {
    alive: bool,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self { alive: true }
    }

    pub fn tick(&mut self) -> HeartbeatAction {
        if !self.alive {
            return HeartbeatAction::Expire;
        }
        self.alive = false;
        HeartbeatAction::Probe
    }

    pub fn acknowledge(&mut self) {
        self.alive = true;
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

type Outbound<S> = SplitSink<WebSocketStream<S>, Message>;

async fn send<S>(sink: &mut Outbound<S>, message: &ServerMessage) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize {} message: {}", message.kind(), e);
            return true;
        }
    };
    sink.send(Message::Text(json.into())).await.is_ok()
}

/// Serve one observer until it disconnects, fails a heartbeat, or its
/// outbound queue breaks. Subscriptions are always released on exit.
pub async fn run_session<S>(ws: WebSocketStream<S>, ctx: SessionContext, pre_authenticated: bool)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = ObserverId::next();
    let mut outbound = ctx.registry.register(id, ctx.outbound_buffer);
    let (mut session, greeting) = Session::open(
        id,
        ctx.engine.clone(),
        ctx.validator.clone(),
        pre_authenticated,
    );
    info!("{} connected (pre-authenticated: {})", id, pre_authenticated);

    let (mut write, mut read) = ws.split();
    let mut heartbeat = Heartbeat::new();
    let mut ticker = interval_at(Instant::now() + ctx.heartbeat_interval, ctx.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut open = send(&mut write, &greeting).await;
    while open {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(message) => open = send(&mut write, &message).await,
                None => open = false,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    for reply in session.handle_text(&text) {
                        if !send(&mut write, &reply).await {
                            open = false;
                            break;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => heartbeat.acknowledge(),
                Some(Ok(Message::Close(_))) | None => open = false,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("{} read error: {}", id, e);
                    open = false;
                }
            },
            _ = ticker.tick() => match heartbeat.tick() {
                HeartbeatAction::Probe => {
                    open = write.send(Message::Ping(Vec::new().into())).await.is_ok();
                }
                HeartbeatAction::Expire => {
                    info!("{} missed a heartbeat, terminating", id);
                    open = false;
                }
            },
        }
    }

    session.close();
    ctx.registry.remove(id);
    let _ = write.close().await;
    info!("{} disconnected", id);
}
