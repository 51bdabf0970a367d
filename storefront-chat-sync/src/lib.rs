//! Storefront Chat Synchronization Core
//!
//! Keeps an in-memory cache of support conversations and messages in sync
//! with the chat service over two transports: a persistent bidirectional
//! channel (WebSocket) and a stateless fallback request API (HTTP).
//!
//! The usual entry point is [`ChatSession`]: it owns the [`ChannelManager`]
//! and the [`Dispatcher`], which is where user actions go in and store
//! snapshots come out.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod fallback;
pub mod model;
pub mod recovery;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

mod error;

pub use channel::{ChannelManager, EventHandler};
pub use config::{ApiConfig, ChannelConfig, ChatConfig, ConversationKinds};
pub use dispatcher::{Dispatcher, SendOutcome};
pub use error::{ChatError, ErrorCategory, ErrorNotice, ErrorSignal, Result};
pub use events::{
    InboundEvent, MarkAsReadPayload, OutboundEvent, PresenceNotice, ReadReceipt,
    SendMessagePayload, ServerFault, TypingNotice, TypingPayload,
};
pub use fallback::{
    AttachmentUpload, FallbackClient, HttpFallbackClient, SendMessageRequest,
};
pub use model::{
    ChannelState, Conversation, ConversationKind, ConversationStatus, Message, SenderType,
};
pub use recovery::ReconnectionStrategy;
pub use session::ChatSession;
pub use store::{
    ConversationStore, MessageStore, StoreChange, StoreListener, SubscriptionId,
};
pub use token::{EnvTokenProvider, StaticTokenProvider, TokenProvider};
pub use transport::{ChannelConnector, ChannelTransport, WebSocketConnector};

#[cfg(test)]
pub mod test_utils;
