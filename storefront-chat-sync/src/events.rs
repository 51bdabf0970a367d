//! Channel event schema
//!
//! Every frame on the bidirectional channel is a JSON text frame of the form
//!
//! ```json
//! {"event": "newMessage", "data": {"id": "m1", "conversationId": "c1", ...}}
//! ```
//!
//! Inbound frames are parsed into the closed [`InboundEvent`] union and
//! validated before anything downstream sees them. Lifecycle events
//! (`connect`, `disconnect`, `reconnect`, ...) are produced locally by the
//! Channel Manager and can never be decoded from the wire.
//!
//! ## Outbound
//!
//! `join_conversation`, `leave_conversation`, `send_message`, `typing_start`,
//! `typing_stop`, `mark_as_read`
//!
//! ## Inbound
//!
//! `newMessage`, `user_joined`, `user_left`, `messageRead`, `userTyping`,
//! `error`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Message;
use crate::{ChatError, Result};

/// Presence change of a room member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    /// Member user id
    pub user_id: String,

    /// Display name
    #[serde(default)]
    pub user_name: String,

    /// Time of the change
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Room the member joined or left, when the server includes it
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Read receipt broadcast by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// Conversation the messages belong to
    pub conversation_id: String,

    /// Messages that were read
    #[serde(default)]
    pub message_ids: Vec<String>,

    /// Reader user id
    #[serde(default)]
    pub read_by: String,

    /// Time of reading
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// Typing indicator broadcast by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    /// Conversation being typed in
    pub conversation_id: String,

    /// Typing user id
    pub user_id: String,

    /// Display name
    #[serde(default)]
    pub user_name: String,

    /// Started (`true`) or stopped (`false`)
    pub is_typing: bool,
}

/// Error reported by the service over the channel
///
/// The service sends either a bare string or an object with a `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FaultRepr")]
pub struct ServerFault {
    /// Error message
    pub message: String,

    /// Optional machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FaultRepr {
    Text(String),
    Object {
        #[serde(default)]
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

impl From<FaultRepr> for ServerFault {
    fn from(repr: FaultRepr) -> Self {
        match repr {
            FaultRepr::Text(message) => ServerFault {
                message,
                code: None,
            },
            FaultRepr::Object { message, code } => ServerFault { message, code },
        }
    }
}

/// Events delivered to channel listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// Channel (re)established
    #[serde(skip)]
    Connect,

    /// Established session dropped
    #[serde(skip)]
    Disconnect {
        /// Why the session ended
        reason: String,
    },

    /// Handshake failed
    #[serde(skip)]
    ConnectError {
        /// Failure description
        message: String,
    },

    /// Reconnection succeeded on the given attempt
    #[serde(skip)]
    Reconnect {
        /// 1-based attempt number
        attempt: u32,
    },

    /// A reconnection attempt failed
    #[serde(skip)]
    ReconnectError {
        /// Failure description
        message: String,
    },

    /// Reconnection budget exhausted
    #[serde(skip)]
    ReconnectFailed,

    /// Message posted to a conversation
    #[serde(rename = "newMessage")]
    NewMessage(Message),

    /// Member joined a room
    #[serde(rename = "user_joined")]
    UserJoined(PresenceNotice),

    /// Member left a room
    #[serde(rename = "user_left")]
    UserLeft(PresenceNotice),

    /// Messages were read
    #[serde(rename = "messageRead")]
    MessageRead(ReadReceipt),

    /// Typing indicator changed
    #[serde(rename = "userTyping")]
    UserTyping(TypingNotice),

    /// Service-side error
    #[serde(rename = "error")]
    Error(ServerFault),
}

impl InboundEvent {
    /// Event name, as used by [`ChannelManager::on`](crate::ChannelManager::on)
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Connect => "connect",
            InboundEvent::Disconnect { .. } => "disconnect",
            InboundEvent::ConnectError { .. } => "connect_error",
            InboundEvent::Reconnect { .. } => "reconnect",
            InboundEvent::ReconnectError { .. } => "reconnect_error",
            InboundEvent::ReconnectFailed => "reconnect_failed",
            InboundEvent::NewMessage(_) => "newMessage",
            InboundEvent::UserJoined(_) => "user_joined",
            InboundEvent::UserLeft(_) => "user_left",
            InboundEvent::MessageRead(_) => "messageRead",
            InboundEvent::UserTyping(_) => "userTyping",
            InboundEvent::Error(_) => "error",
        }
    }

    /// Whether the event was produced locally by the Channel Manager
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            InboundEvent::Connect
                | InboundEvent::Disconnect { .. }
                | InboundEvent::ConnectError { .. }
                | InboundEvent::Reconnect { .. }
                | InboundEvent::ReconnectError { .. }
                | InboundEvent::ReconnectFailed
        )
    }

    /// Decode and validate a text frame
    ///
    /// # Errors
    ///
    /// Returns `ChatError::InvalidEvent` for unknown event names, malformed
    /// payloads and payloads with empty identifiers.
    pub fn from_wire(text: &str) -> Result<Self> {
        let event: InboundEvent = serde_json::from_str(text)
            .map_err(|e| ChatError::invalid_event(format!("undecodable frame: {}", e)))?;
        event.validate()?;
        Ok(event)
    }

    /// Check required identifiers
    pub fn validate(&self) -> Result<()> {
        match self {
            InboundEvent::NewMessage(message) => {
                require("newMessage.id", &message.id)?;
                require("newMessage.conversationId", &message.conversation_id)
            }
            InboundEvent::UserJoined(notice) | InboundEvent::UserLeft(notice) => {
                require("userId", &notice.user_id)
            }
            InboundEvent::MessageRead(receipt) => {
                require("messageRead.conversationId", &receipt.conversation_id)?;
                if receipt.message_ids.iter().any(|id| id.is_empty()) {
                    return Err(ChatError::invalid_event("messageRead.messageIds has empty id"));
                }
                Ok(())
            }
            InboundEvent::UserTyping(notice) => {
                require("userTyping.conversationId", &notice.conversation_id)?;
                require("userTyping.userId", &notice.user_id)
            }
            _ => Ok(()),
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ChatError::invalid_event(format!("{} is empty", field)));
    }
    Ok(())
}

/// `send_message` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    /// Target conversation
    pub conversation_id: String,

    /// Text content
    pub content: String,

    /// Other participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,

    /// Attachment URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,

    /// Id of an already-persisted message (fallback path notification)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// `typing_start` / `typing_stop` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Conversation being typed in
    pub conversation_id: String,
}

/// `mark_as_read` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadPayload {
    /// Conversation the messages belong to
    pub conversation_id: String,

    /// Messages that were unread when the receipt was issued
    pub message_ids: Vec<String>,
}

/// Events sent to the chat service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Join a conversation room
    JoinConversation(String),
    /// Leave a conversation room
    LeaveConversation(String),
    /// Post a message
    SendMessage(SendMessagePayload),
    /// Typing started
    TypingStart(TypingPayload),
    /// Typing stopped
    TypingStop(TypingPayload),
    /// Read receipt
    MarkAsRead(MarkAsReadPayload),
}

impl OutboundEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinConversation(_) => "join_conversation",
            OutboundEvent::LeaveConversation(_) => "leave_conversation",
            OutboundEvent::SendMessage(_) => "send_message",
            OutboundEvent::TypingStart(_) => "typing_start",
            OutboundEvent::TypingStop(_) => "typing_stop",
            OutboundEvent::MarkAsRead(_) => "mark_as_read",
        }
    }

    /// Conversation the event targets
    pub fn conversation_id(&self) -> &str {
        match self {
            OutboundEvent::JoinConversation(id) | OutboundEvent::LeaveConversation(id) => id,
            OutboundEvent::SendMessage(payload) => &payload.conversation_id,
            OutboundEvent::TypingStart(payload) | OutboundEvent::TypingStop(payload) => {
                &payload.conversation_id
            }
            OutboundEvent::MarkAsRead(payload) => &payload.conversation_id,
        }
    }

    /// Encode as a text frame
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_new_message() {
        let frame = json!({
            "event": "newMessage",
            "data": {
                "id": "m1",
                "conversationId": "c1",
                "senderId": "agent-1",
                "senderType": "agent",
                "content": "How can I help?",
                "createdAt": "2024-05-01T10:00:00Z"
            }
        })
        .to_string();

        match InboundEvent::from_wire(&frame).unwrap() {
            InboundEvent::NewMessage(message) => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.content, "How can I help?");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_events_not_decodable() {
        let frame = json!({"event": "connect", "data": null}).to_string();
        assert!(matches!(
            InboundEvent::from_wire(&frame),
            Err(ChatError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let frame = json!({"event": "order_shipped", "data": {}}).to_string();
        assert!(InboundEvent::from_wire(&frame).is_err());
    }

    #[test]
    fn test_empty_ids_rejected() {
        let frame = json!({
            "event": "userTyping",
            "data": {"conversationId": "", "userId": "u1", "isTyping": true}
        })
        .to_string();
        assert!(matches!(
            InboundEvent::from_wire(&frame),
            Err(ChatError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_error_payload_forms() {
        let text = json!({"event": "error", "data": "room not found"}).to_string();
        let object = json!({"event": "error", "data": {"message": "rate limited", "code": "429"}})
            .to_string();

        assert_eq!(
            InboundEvent::from_wire(&text).unwrap(),
            InboundEvent::Error(ServerFault {
                message: "room not found".to_string(),
                code: None
            })
        );
        match InboundEvent::from_wire(&object).unwrap() {
            InboundEvent::Error(fault) => assert_eq!(fault.code.as_deref(), Some("429")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_outbound_wire_shape() {
        let join = OutboundEvent::JoinConversation("c1".to_string());
        let value: serde_json::Value = serde_json::from_str(&join.to_wire().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "join_conversation", "data": "c1"}));

        let read = OutboundEvent::MarkAsRead(MarkAsReadPayload {
            conversation_id: "c1".to_string(),
            message_ids: vec!["m1".to_string()],
        });
        let value: serde_json::Value = serde_json::from_str(&read.to_wire().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "mark_as_read", "data": {"conversationId": "c1", "messageIds": ["m1"]}})
        );
        assert_eq!(read.name(), "mark_as_read");
    }
}
