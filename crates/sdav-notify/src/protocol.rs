//! JSON messages exchanged over the notification channel.
//!
//! Every message is an object with a `type` discriminator.

use crate::metrics::MetricsSnapshot;
use chrono::{DateTime, Utc};
use sdav_core::ChangeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Inbound command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "authenticate")]
    Authenticate {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },

    /// `path` is kept untyped so a non-string path can be rejected with a
    /// subscription error instead of a generic parse error.
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(default)]
        path: Option<Value>,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(default)]
        path: Option<Value>,
    },

    #[serde(rename = "getSubscriptions")]
    GetSubscriptions,

    #[serde(rename = "getMetrics")]
    GetMetrics,

    #[serde(rename = "getClientInfo")]
    GetClientInfo,
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format. Please send a valid JSON message.")]
    Malformed,

    #[error("Unrecognized message type: {0}")]
    UnknownType(String),
}

impl ClientMessage {
    /// Every `type` the server understands.
    pub const TYPES: &'static [&'static str] = &[
        "authenticate",
        "subscribe",
        "unsubscribe",
        "getSubscriptions",
        "getMetrics",
        "getClientInfo",
    ];

    /// Parse a text frame.
    ///
    /// An unknown `type` is reported as such; a known `type` whose fields do
    /// not fit is malformed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(ProtocolError::Malformed);
        };
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|_| ProtocolError::Malformed)
    }
}

/// Per-session details returned by `getClientInfo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub authenticated: bool,
    pub subscription_count: usize,
}

/// Outbound notice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth_required")]
    AuthRequired { message: String },

    #[serde(rename = "connected")]
    Connected { message: String },

    #[serde(rename = "auth_success")]
    AuthSuccess { message: String },

    #[serde(rename = "auth_failed")]
    AuthFailed { message: String },

    #[serde(rename = "auth_error")]
    AuthError { message: String },

    #[serde(rename = "subscriptionConfirmed")]
    SubscriptionConfirmed { path: String, message: String },

    /// Subscribing to an already-held pattern.
    #[serde(rename = "subscriptionInfo")]
    SubscriptionInfo { path: String, message: String },

    #[serde(rename = "subscriptionError")]
    SubscriptionError { path: Value, message: String },

    #[serde(rename = "unsubscriptionConfirmed")]
    UnsubscriptionConfirmed { path: String, message: String },

    #[serde(rename = "unsubscriptionError")]
    UnsubscriptionError { path: Value, message: String },

    #[serde(rename = "subscriptionsList")]
    SubscriptionsList { subscriptions: Vec<String> },

    #[serde(rename = "metrics")]
    Metrics { metrics: MetricsSnapshot },

    #[serde(rename = "clientInfo")]
    ClientInfo {
        #[serde(rename = "clientInfo")]
        client_info: ClientInfo,
    },

    #[serde(rename = "fileChange")]
    FileChange {
        #[serde(rename = "eventType")]
        event_type: ChangeKind,
        path: String,
        timestamp: String,
        size: u64,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// Render as a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AuthRequired { .. } => "auth_required",
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::AuthSuccess { .. } => "auth_success",
            ServerMessage::AuthFailed { .. } => "auth_failed",
            ServerMessage::AuthError { .. } => "auth_error",
            ServerMessage::SubscriptionConfirmed { .. } => "subscriptionConfirmed",
            ServerMessage::SubscriptionInfo { .. } => "subscriptionInfo",
            ServerMessage::SubscriptionError { .. } => "subscriptionError",
            ServerMessage::UnsubscriptionConfirmed { .. } => "unsubscriptionConfirmed",
            ServerMessage::UnsubscriptionError { .. } => "unsubscriptionError",
            ServerMessage::SubscriptionsList { .. } => "subscriptionsList",
            ServerMessage::Metrics { .. } => "metrics",
            ServerMessage::ClientInfo { .. } => "clientInfo",
            ServerMessage::FileChange { .. } => "fileChange",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_commands() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","path":"/docs/*"}"#).unwrap(),
            ClientMessage::Subscribe {
                path: Some(json!("/docs/*"))
            }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe"}"#).unwrap(),
            ClientMessage::Subscribe { path: None }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"getMetrics","extra":1}"#).unwrap(),
            ClientMessage::GetMetrics
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"authenticate","username":"a"}"#).unwrap(),
            ClientMessage::Authenticate {
                username: Some("a".into()),
                password: None
            }
        );
    }

    #[test]
    fn malformed_and_unknown_frames() {
        assert_eq!(ClientMessage::parse("not json"), Err(ProtocolError::Malformed));
        assert_eq!(ClientMessage::parse("[1,2]"), Err(ProtocolError::Malformed));
        assert_eq!(
            ClientMessage::parse(r#"{"type":"launchMissiles"}"#),
            Err(ProtocolError::UnknownType("launchMissiles".into()))
        );
    }

    #[test]
    fn known_type_with_bad_fields_is_malformed() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"authenticate","username":5}"#),
            Err(ProtocolError::Malformed)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"authenticate","password":["x"]}"#),
            Err(ProtocolError::Malformed)
        );
        // A non-string subscribe path is left for the session to reject.
        assert!(ClientMessage::parse(r#"{"type":"subscribe","path":7}"#).is_ok());
    }

    #[test]
    fn file_change_wire_shape() {
        let msg = ServerMessage::FileChange {
            event_type: ChangeKind::DirectoryCreated,
            path: "docs".into(),
            timestamp: "2024-01-01T00:00:00.000Z".into(),
            size: 0,
            mime_type: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "fileChange",
                "eventType": "directoryCreated",
                "path": "docs",
                "timestamp": "2024-01-01T00:00:00.000Z",
                "size": 0
            })
        );
        assert_eq!(msg.kind(), "fileChange");
    }

    #[test]
    fn auth_notices_use_snake_case_types() {
        let value = serde_json::to_value(ServerMessage::AuthRequired {
            message: "x".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "auth_required");
    }
}
