//! Channel Transport Layer
//!
//! The Channel Manager talks to the chat service through the
//! [`ChannelTransport`] / [`ChannelConnector`] pair, so the WebSocket
//! implementation can be swapped for in-memory doubles.

mod r#trait;
pub mod websocket;

pub use r#trait::{ChannelConnector, ChannelTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};
