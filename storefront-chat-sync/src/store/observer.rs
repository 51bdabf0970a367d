//! Store change notifications
//!
//! Presentation code registers a [`StoreListener`] and is called after every
//! store mutation, once the stores are consistent again. Listeners receive a
//! description of what changed and read the new state from the Dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::ErrorNotice;
use crate::events::PresenceNotice;
use crate::model::ChannelState;

/// What changed in the stores
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// The conversation list was reloaded
    ConversationsReplaced,
    /// A single conversation entry changed (preview, unread count, status)
    ConversationUpdated(String),
    /// Messages of a conversation were added, replaced or marked read
    MessagesChanged(String),
    /// Aggregate unread count after the mutation
    UnreadChanged {
        /// New aggregate
        total: u32,
    },
    /// Active conversation switched or cleared
    ActiveConversationChanged(Option<String>),
    /// Channel state changed
    ChannelState(ChannelState),
    /// Typing users of a conversation changed
    Typing(String),
    /// A room member joined (`joined = true`) or left
    Presence {
        /// Joined or left
        joined: bool,
        /// Member details
        notice: PresenceNotice,
    },
    /// An error was raised on the shared error signal
    Error(ErrorNotice),
}

/// Receives store change notifications
pub trait StoreListener: Send + Sync {
    /// Called after a store mutation
    fn on_change(&self, change: &StoreChange);
}

impl<F> StoreListener for F
where
    F: Fn(&StoreChange) + Send + Sync,
{
    fn on_change(&self, change: &StoreChange) {
        self(change)
    }
}

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of store listeners
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn StoreListener>)>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Observers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub async fn subscribe(&self, listener: Arc<dyn StoreListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, listener));
        id
    }

    /// Remove a listener, returning whether it was registered
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Notify every listener of each change, in order
    pub async fn notify(&self, changes: &[StoreChange]) {
        if changes.is_empty() {
            return;
        }

        let listeners: Vec<_> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for change in changes {
            for listener in &listeners {
                listener.on_change(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let observers = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = observers
            .subscribe(Arc::new(move |change: &StoreChange| {
                sink.lock().unwrap().push(change.clone())
            }))
            .await;

        observers
            .notify(&[
                StoreChange::ConversationsReplaced,
                StoreChange::UnreadChanged { total: 2 },
            ])
            .await;
        assert!(observers.unsubscribe(id).await);
        assert!(!observers.unsubscribe(id).await);
        observers.notify(&[StoreChange::ConversationsReplaced]).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                StoreChange::ConversationsReplaced,
                StoreChange::UnreadChanged { total: 2 }
            ]
        );
    }
}
