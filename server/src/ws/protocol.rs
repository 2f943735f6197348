//! JSON wire events for the real-time channel.
//!
//! Inbound: `{type: "register"|"heartbeat"|"message"|"read", to?, from?, message?}`
//! Outbound: `unread_counts`, `message`, `presence`, `error`.

use axum::extract::ws::Message as WsMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::store::{Message, UnreadCounts};
use crate::UserId;

/// A validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Presence confirmation. Identity always comes from the credential.
    Register,
    Send { to: UserId, body: String },
    Read { from: UserId },
}

/// Why a text frame did not produce an [`InboundEvent`].
#[derive(Debug)]
pub enum DecodeError {
    /// Not JSON, or an unknown event type. Dropped without a reply.
    Malformed(String),
    /// Recognised event with bad fields. Reported to the sender.
    Invalid(ChatError),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    to: Option<UserId>,
    from: Option<UserId>,
    message: Option<String>,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<InboundEvent, DecodeError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match raw.kind.as_str() {
        "register" | "heartbeat" => Ok(InboundEvent::Register),
        "message" => {
            let to = raw
                .to
                .ok_or_else(|| DecodeError::Invalid(ChatError::validation("missing recipient")))?;
            let body = raw.message.unwrap_or_default();
            if body.trim().is_empty() {
                return Err(DecodeError::Invalid(ChatError::validation(
                    "message body is empty",
                )));
            }
            Ok(InboundEvent::Send { to, body })
        }
        "read" => raw
            .from
            .map(|from| InboundEvent::Read { from })
            .ok_or_else(|| DecodeError::Invalid(ChatError::validation("missing sender"))),
        other => Err(DecodeError::Malformed(format!("unknown event type {other:?}"))),
    }
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    UnreadCounts {
        counts: UnreadCounts,
    },
    Message {
        id: i64,
        from: UserId,
        to: UserId,
        message: String,
        #[serde(rename = "createdAt")]
        created_at: DateTime<Utc>,
    },
    Presence {
        #[serde(rename = "userIds")]
        user_ids: Vec<UserId>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OutboundEvent {
    pub fn from_error(err: &ChatError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Encode as a text frame.
    pub fn to_ws_message(&self) -> Option<WsMessage> {
        match serde_json::to_string(self) {
            Ok(json) => Some(WsMessage::Text(json.into())),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode outbound event");
                None
            }
        }
    }
}

impl From<&Message> for OutboundEvent {
    fn from(msg: &Message) -> Self {
        Self::Message {
            id: msg.id,
            from: msg.from,
            to: msg.to,
            message: msg.body.clone(),
            created_at: msg.created_at,
        }
    }
}
