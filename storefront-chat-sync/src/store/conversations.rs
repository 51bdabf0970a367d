//! Conversation Store

use std::collections::HashMap;

use crate::model::{Conversation, Message};

use super::MessageStore;

/// In-memory conversation list, id-indexed with a display order
///
/// Unread counts are never incremented in place. Every count is recomputed
/// by [`refresh_unread`](Self::refresh_unread) from the message store and the
/// server-reported baseline of the last list reload.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    by_id: HashMap<String, Conversation>,
    order: Vec<String>,
    baseline: HashMap<String, u32>,
}

impl ConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list with a server listing
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.by_id.clear();
        self.order.clear();
        self.baseline.clear();

        for conversation in conversations {
            if self.by_id.contains_key(&conversation.id) {
                continue;
            }
            self.order.push(conversation.id.clone());
            self.baseline
                .insert(conversation.id.clone(), conversation.unread_count);
            self.by_id.insert(conversation.id.clone(), conversation);
        }
    }

    /// Make sure an entry exists for `id`, creating a placeholder at the top
    pub fn ensure(&mut self, id: &str) -> &mut Conversation {
        if !self.by_id.contains_key(id) {
            self.order.insert(0, id.to_string());
        }
        self.by_id
            .entry(id.to_string())
            .or_insert_with(|| Conversation::placeholder(id))
    }

    /// Update the last-message preview from a message
    ///
    /// Older messages (history pages, late echoes) do not move the preview
    /// backwards.
    pub fn record_last_message(&mut self, message: &Message) {
        let conversation = self.ensure(&message.conversation_id);
        if conversation
            .last_message_at
            .is_some_and(|at| at > message.created_at)
        {
            return;
        }

        let preview = if message.content.is_empty() && !message.attachments.is_empty() {
            "[attachment]".to_string()
        } else {
            message.content.clone()
        };
        conversation.last_message = Some(preview);
        conversation.last_message_at = Some(message.created_at);
    }

    /// Forget the server-reported unread baseline (after a read receipt)
    pub fn clear_baseline(&mut self, id: &str) {
        self.baseline.remove(id);
    }

    /// Recompute one conversation's unread count
    ///
    /// With page 1 loaded the count is derived from the cached messages alone;
    /// otherwise it is the server baseline plus the unread messages received
    /// since the last reload. Returns whether the count changed.
    pub fn refresh_unread(&mut self, id: &str, messages: &MessageStore) -> bool {
        let count = if messages.is_loaded(id) {
            messages.unread_count(id)
        } else {
            self.baseline
                .get(id)
                .copied()
                .unwrap_or(0)
                .saturating_add(messages.unread_since_baseline(id))
        };

        match self.by_id.get_mut(id) {
            Some(conversation) if conversation.unread_count != count => {
                conversation.unread_count = count;
                true
            }
            _ => false,
        }
    }

    /// Recompute every conversation's unread count
    pub fn refresh_all_unread(&mut self, messages: &MessageStore) {
        for id in self.order.clone() {
            self.refresh_unread(&id, messages);
        }
    }

    /// Aggregate unread count across all conversations
    pub fn total_unread(&self) -> u32 {
        self.by_id
            .values()
            .map(|conversation| conversation.unread_count)
            .sum()
    }

    /// Look up a conversation
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.by_id.get(id)
    }

    /// Conversations in display order
    pub fn list(&self) -> Vec<Conversation> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    /// Number of conversations
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
