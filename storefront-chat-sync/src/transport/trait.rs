//! Channel Transport Trait Abstraction

use crate::events::{InboundEvent, OutboundEvent};
use crate::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// An established bidirectional channel
#[async_trait]
pub trait ChannelTransport: Send + Debug {
    /// Send one event
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame cannot be written; the session
    /// is then considered dropped.
    async fn send_event(&mut self, event: &OutboundEvent) -> Result<()>;

    /// Receive the next valid inbound event
    ///
    /// Frames failing schema validation are skipped by the implementation.
    /// Returns `Ok(None)` when the remote side closed the channel.
    ///
    /// Must be cancel safe: the Channel Manager polls it inside `select!`.
    async fn receive_event(&mut self) -> Result<Option<InboundEvent>>;

    /// Close the channel gracefully
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for channel connections
#[async_trait]
pub trait ChannelConnector: Send + Sync + Debug {
    /// Open and authenticate a channel
    ///
    /// # Errors
    ///
    /// `ChatError::Authentication` when the service rejects `token` (terminal),
    /// any other error for transient failures.
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn ChannelTransport>>;
}
