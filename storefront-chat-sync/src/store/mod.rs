//! Conversation and Message Stores
//!
//! In-memory, authoritative client-side caches. Only the
//! [`Dispatcher`](crate::Dispatcher) mutates them; presentation code reads
//! snapshots and listens through the [`observer`] interface.

mod conversations;
mod messages;
pub mod observer;

pub use conversations::ConversationStore;
pub use messages::{MergeOutcome, MessageStore};
pub use observer::{Observers, StoreChange, StoreListener, SubscriptionId};
