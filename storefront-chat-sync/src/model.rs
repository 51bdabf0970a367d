//! Conversation and message data model
//!
//! Field names follow the chat service's JSON (camelCase). Timestamps are
//! RFC 3339 strings on the wire and `DateTime<Utc>` in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConversationKinds;

/// Lifecycle status of a support conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Waiting for an agent
    #[default]
    Pending,
    /// Agent assigned, conversation ongoing
    Active,
    /// Resolved or abandoned
    Closed,
}

/// Support conversation as mirrored from the chat service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id
    pub id: String,

    /// Subject line
    #[serde(default)]
    pub subject: String,

    /// Status
    #[serde(default)]
    pub status: ConversationStatus,

    /// Preview of the last message
    #[serde(default)]
    pub last_message: Option<String>,

    /// Time of the last message
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,

    /// Unread messages from the other side
    #[serde(default)]
    pub unread_count: u32,

    /// Avatar URL of the other participant
    #[serde(default)]
    pub participant_avatar: Option<String>,

    /// User id of the other participant, used as `receiver` on send
    #[serde(default)]
    pub participant_id: Option<String>,
}

impl Conversation {
    /// Create a bare conversation entry for an id first seen on an inbound event
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: String::new(),
            status: ConversationStatus::Active,
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            participant_avatar: None,
            participant_id: None,
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// The signed-in customer
    User,
    /// A human support agent
    Agent,
    /// The automated assistant
    Ai,
    /// Service notices
    System,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id
    pub id: String,

    /// Owning conversation
    pub conversation_id: String,

    /// Author id
    #[serde(default)]
    pub sender_id: String,

    /// Author kind
    pub sender_type: SenderType,

    /// Text content
    #[serde(default)]
    pub content: String,

    /// Attachment URLs
    #[serde(default)]
    pub attachments: Vec<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Whether the recipient has read the message
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Whether this message counts toward the unread total
    pub fn counts_as_unread(&self) -> bool {
        !self.is_read && self.sender_type != SenderType::User
    }
}

/// Routing class of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    /// Human agent conversation backed by a joinable channel room
    Peer,
    /// Automated assistant, fallback API only
    Assistant,
    /// Shop-default conversation, fallback API only
    ShopDefault,
}

impl ConversationKind {
    /// Classify a conversation id
    pub fn classify(conversation_id: &str, kinds: &ConversationKinds) -> Self {
        if conversation_id == kinds.assistant_id {
            ConversationKind::Assistant
        } else if conversation_id == kinds.shop_default_id {
            ConversationKind::ShopDefault
        } else {
            ConversationKind::Peer
        }
    }

    /// Whether the conversation is served through a channel room
    pub fn is_peer(&self) -> bool {
        matches!(self, ConversationKind::Peer)
    }

    /// `messageType` value sent to the fallback API
    pub fn message_type(&self) -> &'static str {
        match self {
            ConversationKind::Peer => "text",
            ConversationKind::Assistant => "ai",
            ConversationKind::ShopDefault => "shop",
        }
    }
}

/// Connection state of the bidirectional channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No channel, or torn down
    #[default]
    Disconnected,
    /// First handshake in progress
    Connecting,
    /// Channel usable, emits are delivered
    Connected,
    /// Transient failure, bounded retries in progress
    Reconnecting,
}

impl ChannelState {
    /// Get state name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
