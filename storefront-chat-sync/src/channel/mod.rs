//! Bidirectional channel lifecycle

mod manager;

pub use manager::{ChannelManager, EventHandler};
