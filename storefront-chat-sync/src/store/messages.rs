//! Message Store
//!
//! Per-conversation message lists, indexed by id for O(1) merge and paired
//! with an insertion-ordered id list for display. Server pages are kept in the
//! order received; the store never re-sorts them.

use std::collections::{HashMap, HashSet};

use crate::model::Message;

/// Result of merging one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New id, appended at the end
    Inserted,
    /// Known id, replaced in place
    Updated,
}

/// Messages of a single conversation
#[derive(Debug, Clone, Default)]
struct Thread {
    by_id: HashMap<String, Message>,
    order: Vec<String>,
    /// Page 1 has been fetched from the fallback API
    loaded: bool,
    /// Ids first seen after the last conversation list reload
    received: HashSet<String>,
}

impl Thread {
    fn merge(&mut self, message: Message) -> MergeOutcome {
        match self.by_id.get_mut(&message.id) {
            Some(existing) => {
                // read state only moves forward
                let was_read = existing.is_read;
                *existing = message;
                existing.is_read |= was_read;
                MergeOutcome::Updated
            }
            None => {
                self.received.insert(message.id.clone());
                self.order.push(message.id.clone());
                self.by_id.insert(message.id.clone(), message);
                MergeOutcome::Inserted
            }
        }
    }

    fn ordered(&self) -> Vec<Message> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    fn unread_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.by_id.get(*id).is_some_and(Message::counts_as_unread))
            .cloned()
            .collect()
    }
}

/// In-memory message cache for all conversations
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    threads: HashMap<String, Thread>,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a conversation's list with page 1 of its history
    pub fn replace_first_page(&mut self, conversation_id: &str, messages: Vec<Message>) {
        let mut thread = Thread {
            loaded: true,
            ..Thread::default()
        };
        for message in messages {
            thread.merge(message);
        }
        self.threads.insert(conversation_id.to_string(), thread);
    }

    /// Append a later page in the order received
    ///
    /// Ids already present are updated in place rather than duplicated.
    pub fn append_page(&mut self, conversation_id: &str, messages: Vec<Message>) -> usize {
        let thread = self.threads.entry(conversation_id.to_string()).or_default();
        messages
            .into_iter()
            .map(|message| thread.merge(message))
            .filter(|outcome| *outcome == MergeOutcome::Inserted)
            .count()
    }

    /// Merge one message by id
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        self.threads
            .entry(message.conversation_id.clone())
            .or_default()
            .merge(message)
    }

    /// Mark the given messages read, returning how many changed
    pub fn mark_read(&mut self, conversation_id: &str, message_ids: &[String]) -> usize {
        let Some(thread) = self.threads.get_mut(conversation_id) else {
            return 0;
        };

        let mut changed = 0;
        for id in message_ids {
            if let Some(message) = thread.by_id.get_mut(id) {
                if !message.is_read {
                    message.is_read = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Mark every counted-unread message read, returning their ids
    pub fn mark_all_read(&mut self, conversation_id: &str) -> Vec<String> {
        let unread = self.unread_ids(conversation_id);
        self.mark_read(conversation_id, &unread);
        unread
    }

    /// Ids of unread messages from the other side, in display order
    pub fn unread_ids(&self, conversation_id: &str) -> Vec<String> {
        self.threads
            .get(conversation_id)
            .map(Thread::unread_ids)
            .unwrap_or_default()
    }

    /// Unread messages from the other side first seen since the last list reload
    ///
    /// These are the messages the server-reported baseline cannot include yet.
    pub fn unread_since_baseline(&self, conversation_id: &str) -> u32 {
        self.threads
            .get(conversation_id)
            .map(|thread| {
                thread
                    .received
                    .iter()
                    .filter_map(|id| thread.by_id.get(id))
                    .filter(|message| message.counts_as_unread())
                    .count() as u32
            })
            .unwrap_or(0)
    }

    /// Number of unread messages from the other side
    pub fn unread_count(&self, conversation_id: &str) -> u32 {
        self.threads
            .get(conversation_id)
            .map(|thread| {
                thread
                    .by_id
                    .values()
                    .filter(|message| message.counts_as_unread())
                    .count() as u32
            })
            .unwrap_or(0)
    }

    /// Messages in display order
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.threads
            .get(conversation_id)
            .map(Thread::ordered)
            .unwrap_or_default()
    }

    /// Look up one message
    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        self.threads
            .get(conversation_id)
            .and_then(|thread| thread.by_id.get(message_id))
    }

    /// Number of cached messages for a conversation
    pub fn len(&self, conversation_id: &str) -> usize {
        self.threads
            .get(conversation_id)
            .map(|thread| thread.order.len())
            .unwrap_or(0)
    }

    /// Whether page 1 has been loaded for the conversation
    pub fn is_loaded(&self, conversation_id: &str) -> bool {
        self.threads
            .get(conversation_id)
            .is_some_and(|thread| thread.loaded)
    }

    /// Start a new baseline period
    ///
    /// Called when the conversation list is reloaded: the server's unread
    /// counts now cover every message cached so far. The messages stay.
    pub fn rebase(&mut self) {
        for thread in self.threads.values_mut() {
            thread.received.clear();
        }
    }
}
