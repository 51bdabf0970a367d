//! Dispatcher
//!
//! Routes user actions to the channel or the fallback API depending on the
//! channel state and the conversation kind, and turns inbound channel events
//! into store mutations.
//!
//! ## Send policy
//!
//! | Conversation | Channel     | Path                                          |
//! |--------------|-------------|-----------------------------------------------|
//! | peer         | `Connected` | emit `send_message`, no local insertion       |
//! | peer         | otherwise   | fallback POST, one optimistic insertion       |
//! | synthetic    | any         | fallback POST, one optimistic insertion       |
//!
//! After a fallback send the channel is notified as well when it happens to be
//! `Connected`, carrying the confirmed message id so listeners can dedupe.
//!
//! Store locks are never held across a network call, and listeners are
//! notified only after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::channel::ChannelManager;
use crate::config::ConversationKinds;
use crate::error::ErrorSignal;
use crate::events::{
    InboundEvent, MarkAsReadPayload, OutboundEvent, ReadReceipt, SendMessagePayload,
    TypingNotice, TypingPayload,
};
use crate::fallback::{AttachmentUpload, FallbackClient, SendMessageRequest};
use crate::model::{ChannelState, Conversation, ConversationKind, Message, SenderType};
use crate::store::{
    ConversationStore, MessageStore, Observers, StoreChange, StoreListener, SubscriptionId,
};
use crate::{ChatError, Result};

/// How a message left the client
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Emitted over the channel; the message appears with the inbound echo
    Emitted,
    /// Persisted through the fallback API and inserted locally
    Delivered(Message),
}

#[derive(Debug, Default)]
struct ChatState {
    conversations: ConversationStore,
    messages: MessageStore,
    active: Option<String>,
    /// conversation id -> user id -> display name
    typing: HashMap<String, BTreeMap<String, String>>,
}

impl ChatState {
    fn refresh_unread(&mut self, conversation_id: &str) -> u32 {
        self.conversations
            .refresh_unread(conversation_id, &self.messages);
        self.conversations.total_unread()
    }

    /// Insert or update a message and its conversation preview
    fn apply_message(&mut self, message: Message) -> u32 {
        let conversation_id = message.conversation_id.clone();
        self.conversations.record_last_message(&message);
        self.messages.merge(message);
        self.refresh_unread(&conversation_id)
    }
}

/// Routes actions and events between the channel, the fallback API and the stores
pub struct Dispatcher {
    channel: Arc<ChannelManager>,
    fallback: Arc<dyn FallbackClient>,
    kinds: ConversationKinds,
    state: RwLock<ChatState>,
    observers: Observers,
    errors: ErrorSignal,
    active_receipts: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channel", &self.channel)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher with empty stores
    pub fn new(
        channel: Arc<ChannelManager>,
        fallback: Arc<dyn FallbackClient>,
        kinds: ConversationKinds,
        errors: ErrorSignal,
    ) -> Self {
        Self {
            channel,
            fallback,
            kinds,
            state: RwLock::new(ChatState::default()),
            observers: Observers::new(),
            errors,
            active_receipts: false,
        }
    }

    /// Also send a read receipt for messages arriving in the open conversation
    pub fn with_active_receipts(mut self, enabled: bool) -> Self {
        self.active_receipts = enabled;
        self
    }

    /// Classify a conversation id
    pub fn kind(&self, conversation_id: &str) -> ConversationKind {
        ConversationKind::classify(conversation_id, &self.kinds)
    }

    /// Register a store listener
    pub async fn subscribe(&self, listener: Arc<dyn StoreListener>) -> SubscriptionId {
        self.observers.subscribe(listener).await
    }

    /// Remove a store listener
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id).await
    }

    /// Shared error signal
    pub fn errors(&self) -> &ErrorSignal {
        &self.errors
    }

    // ---- queries ----

    /// Conversations in display order
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.list()
    }

    /// One conversation
    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state
            .read()
            .await
            .conversations
            .get(conversation_id)
            .cloned()
    }

    /// Cached messages of a conversation in display order
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.state.read().await.messages.messages(conversation_id)
    }

    /// Aggregate unread count
    pub async fn total_unread(&self) -> u32 {
        self.state.read().await.conversations.total_unread()
    }

    /// The active conversation, if any
    pub async fn active_conversation(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    /// Display names of users currently typing in a conversation
    pub async fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .typing
            .get(conversation_id)
            .map(|users| users.values().cloned().collect())
            .unwrap_or_default()
    }

    // ---- active conversation ----

    /// Make `conversation_id` the single active conversation
    ///
    /// While `Connected`, the previous peer room is left and the new one
    /// joined. The new room is recorded on the Channel Manager either way so
    /// it is joined on every later (re)connect.
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<()> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::application("conversation id is empty"));
        }

        let previous = {
            let mut state = self.state.write().await;
            if state.active.as_deref() == Some(conversation_id) {
                return Ok(());
            }
            state.active.replace(conversation_id.to_string())
        };
        info!("Active conversation: {}", conversation_id);

        self.leave_room(previous).await;
        if self.kind(conversation_id).is_peer() {
            self.channel.join_room(conversation_id).await;
        } else {
            self.channel.set_active_room(None).await;
        }

        self.observers
            .notify(&[StoreChange::ActiveConversationChanged(Some(
                conversation_id.to_string(),
            ))])
            .await;
        Ok(())
    }

    /// Leave the active conversation
    pub async fn clear_active_conversation(&self) {
        let previous = self.state.write().await.active.take();
        if previous.is_none() {
            return;
        }

        self.channel.set_active_room(None).await;
        self.leave_room(previous).await;
        self.observers
            .notify(&[StoreChange::ActiveConversationChanged(None)])
            .await;
    }

    async fn leave_room(&self, room: Option<String>) {
        if let Some(room) = room.filter(|id| self.kind(id).is_peer()) {
            self.channel
                .emit(OutboundEvent::LeaveConversation(room))
                .await;
        }
    }

    // ---- user actions ----

    /// Send a message to the active conversation
    ///
    /// # Errors
    ///
    /// `ChatError::NoActiveConversation` without an active conversation,
    /// `ChatError::Application` for an empty message, and any fallback request
    /// error unchanged.
    pub async fn send_message(
        &self,
        content: &str,
        attachments: Vec<String>,
    ) -> Result<SendOutcome> {
        let conversation_id = self
            .active_conversation()
            .await
            .ok_or(ChatError::NoActiveConversation)?;
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::application("message is empty"));
        }

        let kind = self.kind(&conversation_id);
        let receiver = self
            .conversation(&conversation_id)
            .await
            .and_then(|c| c.participant_id);

        if kind.is_peer() && self.channel.current_state() == ChannelState::Connected {
            let event = OutboundEvent::SendMessage(SendMessagePayload {
                conversation_id: conversation_id.clone(),
                content: content.to_string(),
                receiver: receiver.clone(),
                attachments: attachments.clone(),
                message_id: None,
            });
            if self.channel.emit(event).await {
                debug!("Message for {} emitted over channel", conversation_id);
                return Ok(SendOutcome::Emitted);
            }
            debug!("Channel went away, sending {} through fallback", conversation_id);
        }

        let request = SendMessageRequest {
            conversation_id: Some(conversation_id.clone()),
            message: content.to_string(),
            subject: None,
            message_type: kind.message_type().to_string(),
            attachments,
            receiver: receiver.clone(),
        };
        let mut message = self.fallback.send_message(&request).await?;
        message.conversation_id = conversation_id.clone();
        message.sender_type = SenderType::User;
        debug!("Message {} persisted through fallback", message.id);

        let total = self.state.write().await.apply_message(message.clone());
        self.observers
            .notify(&[
                StoreChange::MessagesChanged(conversation_id.clone()),
                StoreChange::ConversationUpdated(conversation_id.clone()),
                StoreChange::UnreadChanged { total },
            ])
            .await;

        if self.channel.current_state() == ChannelState::Connected {
            self.channel
                .emit(OutboundEvent::SendMessage(SendMessagePayload {
                    conversation_id,
                    content: message.content.clone(),
                    receiver,
                    attachments: message.attachments.clone(),
                    message_id: Some(message.id.clone()),
                }))
                .await;
        }

        Ok(SendOutcome::Delivered(message))
    }

    /// Mark every message of a conversation read
    ///
    /// The unread count is cleared immediately. A failed fallback receipt is
    /// reported on the error signal; the local clear stays.
    pub async fn mark_as_read(&self, conversation_id: &str) -> Result<()> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::application("conversation id is empty"));
        }

        let (message_ids, total) = {
            let mut state = self.state.write().await;
            let message_ids = state.messages.mark_all_read(conversation_id);
            state.conversations.clear_baseline(conversation_id);
            let total = state.refresh_unread(conversation_id);
            (message_ids, total)
        };

        let mut changes = vec![StoreChange::ConversationUpdated(
            conversation_id.to_string(),
        )];
        if !message_ids.is_empty() {
            changes.push(StoreChange::MessagesChanged(conversation_id.to_string()));
        }
        changes.push(StoreChange::UnreadChanged { total });
        self.observers.notify(&changes).await;

        if self.kind(conversation_id).is_peer()
            && self.channel.current_state() == ChannelState::Connected
        {
            self.channel
                .emit(OutboundEvent::MarkAsRead(MarkAsReadPayload {
                    conversation_id: conversation_id.to_string(),
                    message_ids,
                }))
                .await;
        }

        if let Err(e) = self.fallback.mark_read(conversation_id).await {
            warn!("Read receipt for {} failed: {}", conversation_id, e);
            self.report(&e).await;
        }
        Ok(())
    }

    /// Start a new conversation with a first message
    ///
    /// The conversation list is reloaded and the new conversation becomes
    /// active.
    pub async fn create_new_conversation(
        &self,
        subject: &str,
        message: &str,
        receiver: Option<String>,
    ) -> Result<Message> {
        if subject.trim().is_empty() {
            return Err(ChatError::application("subject is empty"));
        }
        if message.trim().is_empty() {
            return Err(ChatError::application("message is empty"));
        }

        let request = SendMessageRequest {
            conversation_id: None,
            message: message.to_string(),
            subject: Some(subject.to_string()),
            message_type: ConversationKind::Peer.message_type().to_string(),
            attachments: Vec::new(),
            receiver,
        };
        let mut created = self.fallback.send_message(&request).await?;
        if created.conversation_id.trim().is_empty() {
            return Err(ChatError::Request(
                "created message carries no conversation id".to_string(),
            ));
        }
        created.sender_type = SenderType::User;
        info!("Created conversation {}", created.conversation_id);

        self.load_conversations().await;
        let total = self.state.write().await.apply_message(created.clone());
        self.observers
            .notify(&[
                StoreChange::MessagesChanged(created.conversation_id.clone()),
                StoreChange::UnreadChanged { total },
            ])
            .await;

        self.select_conversation(&created.conversation_id).await?;
        Ok(created)
    }

    /// Upload a file, returning its attachment URL
    pub async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<String> {
        info!(
            "Uploading attachment {} ({} bytes)",
            upload.file_name,
            upload.bytes.len()
        );
        self.fallback.upload_attachment(upload).await
    }

    /// Emit `typing_start` for the active peer conversation
    pub async fn start_typing(&self) -> bool {
        match self.active_room().await {
            Some(conversation_id) => {
                self.channel
                    .emit(OutboundEvent::TypingStart(TypingPayload { conversation_id }))
                    .await
            }
            None => false,
        }
    }

    /// Emit `typing_stop` for the active peer conversation
    pub async fn stop_typing(&self) -> bool {
        match self.active_room().await {
            Some(conversation_id) => {
                self.channel
                    .emit(OutboundEvent::TypingStop(TypingPayload { conversation_id }))
                    .await
            }
            None => false,
        }
    }

    async fn active_room(&self) -> Option<String> {
        self.active_conversation()
            .await
            .filter(|id| self.kind(id).is_peer())
    }

    // ---- passive loads ----

    /// Reload the conversation list
    ///
    /// Failures are reported on the error signal. Returns whether the list
    /// was replaced.
    pub async fn load_conversations(&self) -> bool {
        let conversations = match self.fallback.list_conversations().await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Loading conversations failed: {}", e);
                self.report(&e).await;
                return false;
            }
        };
        debug!("Loaded {} conversations", conversations.len());

        let total = {
            let mut state = self.state.write().await;
            state.messages.rebase();
            state.conversations.replace_all(conversations);
            let ChatState {
                conversations,
                messages,
                ..
            } = &mut *state;
            conversations.refresh_all_unread(messages);
            conversations.total_unread()
        };

        self.observers
            .notify(&[
                StoreChange::ConversationsReplaced,
                StoreChange::UnreadChanged { total },
            ])
            .await;
        true
    }

    /// Load one page of a conversation's history
    ///
    /// Page 1 replaces the cached list, later pages are appended in the order
    /// received. A result for a conversation that was active when the call
    /// started but no longer is gets discarded. Failures are reported on the
    /// error signal. Returns whether the page was applied.
    pub async fn load_messages(&self, conversation_id: &str, page: u32) -> bool {
        let page = page.max(1);
        let was_active = self.active_conversation().await.as_deref() == Some(conversation_id);

        let messages = match self.fallback.list_messages(conversation_id, page).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Loading page {} of {} failed: {}", page, conversation_id, e);
                self.report(&e).await;
                return false;
            }
        };

        let total = {
            let mut state = self.state.write().await;
            if was_active && state.active.as_deref() != Some(conversation_id) {
                debug!(
                    "Discarding page {} of {}: no longer active",
                    page, conversation_id
                );
                return false;
            }

            let newest = messages.iter().max_by_key(|m| m.created_at).cloned();
            if page == 1 {
                state.messages.replace_first_page(conversation_id, messages);
            } else {
                state.messages.append_page(conversation_id, messages);
            }
            if let Some(newest) = newest {
                state.conversations.record_last_message(&newest);
            }
            state.refresh_unread(conversation_id)
        };

        self.observers
            .notify(&[
                StoreChange::MessagesChanged(conversation_id.to_string()),
                StoreChange::ConversationUpdated(conversation_id.to_string()),
                StoreChange::UnreadChanged { total },
            ])
            .await;
        true
    }

    // ---- inbound ----

    /// Apply one inbound channel event
    pub async fn handle_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::NewMessage(message) => self.on_new_message(message).await,
            InboundEvent::MessageRead(receipt) => self.on_message_read(receipt).await,
            InboundEvent::UserTyping(notice) => self.on_typing(notice).await,
            InboundEvent::UserJoined(notice) => {
                self.observers
                    .notify(&[StoreChange::Presence {
                        joined: true,
                        notice,
                    }])
                    .await
            }
            InboundEvent::UserLeft(notice) => {
                self.observers
                    .notify(&[StoreChange::Presence {
                        joined: false,
                        notice,
                    }])
                    .await
            }
            InboundEvent::Error(fault) => {
                warn!("Chat service reported: {}", fault.message);
                self.report(&ChatError::Transport(format!(
                    "service error: {}",
                    fault.message
                )))
                .await;
            }
            lifecycle => self.on_lifecycle(lifecycle).await,
        }
    }

    async fn on_new_message(&self, mut message: Message) {
        let conversation_id = message.conversation_id.clone();

        let (total, acknowledged) = {
            let mut state = self.state.write().await;
            let is_active = state.active.as_deref() == Some(conversation_id.as_str());
            let acknowledged = if is_active && message.counts_as_unread() {
                message.is_read = true;
                Some(message.id.clone())
            } else {
                None
            };
            (state.apply_message(message), acknowledged)
        };

        self.observers
            .notify(&[
                StoreChange::MessagesChanged(conversation_id.clone()),
                StoreChange::ConversationUpdated(conversation_id.clone()),
                StoreChange::UnreadChanged { total },
            ])
            .await;

        if !self.active_receipts || !self.kind(&conversation_id).is_peer() {
            return;
        }
        if let Some(message_id) = acknowledged {
            self.channel
                .emit(OutboundEvent::MarkAsRead(MarkAsReadPayload {
                    conversation_id,
                    message_ids: vec![message_id],
                }))
                .await;
        }
    }

    async fn on_message_read(&self, receipt: ReadReceipt) {
        let (changed, total) = {
            let mut state = self.state.write().await;
            let changed = state
                .messages
                .mark_read(&receipt.conversation_id, &receipt.message_ids);
            (changed, state.refresh_unread(&receipt.conversation_id))
        };
        if changed == 0 {
            return;
        }

        self.observers
            .notify(&[
                StoreChange::MessagesChanged(receipt.conversation_id.clone()),
                StoreChange::ConversationUpdated(receipt.conversation_id),
                StoreChange::UnreadChanged { total },
            ])
            .await;
    }

    async fn on_typing(&self, notice: TypingNotice) {
        {
            let mut state = self.state.write().await;
            let users = state
                .typing
                .entry(notice.conversation_id.clone())
                .or_default();
            if notice.is_typing {
                let name = if notice.user_name.is_empty() {
                    notice.user_id.clone()
                } else {
                    notice.user_name
                };
                users.insert(notice.user_id, name);
            } else {
                users.remove(&notice.user_id);
            }
        }

        self.observers
            .notify(&[StoreChange::Typing(notice.conversation_id)])
            .await;
    }

    async fn on_lifecycle(&self, event: InboundEvent) {
        debug!("Channel lifecycle: {}", event.name());
        let mut changes = vec![StoreChange::ChannelState(self.channel.current_state())];

        match event {
            InboundEvent::Disconnect { .. } => {
                let cleared: Vec<String> = {
                    let mut state = self.state.write().await;
                    state.typing.drain().map(|(id, _)| id).collect()
                };
                changes.extend(cleared.into_iter().map(StoreChange::Typing));
            }
            InboundEvent::ConnectError { .. } | InboundEvent::ReconnectFailed => {
                if let Some(notice) = self.errors.current() {
                    changes.push(StoreChange::Error(notice));
                }
            }
            _ => {}
        }

        self.observers.notify(&changes).await;
    }

    /// Publish an absorbed error
    async fn report(&self, error: &ChatError) {
        let notice = self.errors.raise(error);
        self.observers.notify(&[StoreChange::Error(notice)]).await;
    }
}
