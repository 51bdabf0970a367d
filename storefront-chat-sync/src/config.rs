//! Sync Core Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of reconnection attempts before giving up
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Default channel handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default fallback request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Conversation id of the automated assistant
pub const ASSISTANT_CONVERSATION_ID: &str = "ai-assistant";

/// Conversation id of the shop-default conversation
pub const SHOP_DEFAULT_CONVERSATION_ID: &str = "shop-default";

/// Top-level configuration for a chat session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Bidirectional channel settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Fallback request API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Synthetic conversation ids
    #[serde(default)]
    pub conversations: ConversationKinds,
}

/// Bidirectional channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the chat service
    #[serde(default = "default_channel_url")]
    pub url: String,

    /// Reconnection attempts after a transient failure
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Handshake timeout, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Send a read receipt for messages arriving in the open conversation
    ///
    /// Off by default: such messages are only marked read locally until the
    /// user marks the conversation read.
    #[serde(default)]
    pub acknowledge_active: bool,
}

/// Fallback request API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the chat REST API (no trailing slash)
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Ids of the synthetic conversation kinds
///
/// Synthetic conversations are served only through the fallback API and never
/// joined as channel rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationKinds {
    /// Automated-assistant conversation id
    #[serde(default = "default_assistant_id")]
    pub assistant_id: String,

    /// Shop-default conversation id
    #[serde(default = "default_shop_default_id")]
    pub shop_default_id: String,
}

fn default_channel_url() -> String {
    "wss://chat.storefront.example/ws".to_string()
}

fn default_reconnect_attempts() -> u32 {
    DEFAULT_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_api_base_url() -> String {
    "https://api.storefront.example/chat".to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_assistant_id() -> String {
    ASSISTANT_CONVERSATION_ID.to_string()
}

fn default_shop_default_id() -> String {
    SHOP_DEFAULT_CONVERSATION_ID.to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_channel_url(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            acknowledge_active: false,
        }
    }
}

impl ChannelConfig {
    /// Get reconnection delay as Duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Get handshake timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ApiConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ConversationKinds {
    fn default() -> Self {
        Self {
            assistant_id: default_assistant_id(),
            shop_default_id: default_shop_default_id(),
        }
    }
}
