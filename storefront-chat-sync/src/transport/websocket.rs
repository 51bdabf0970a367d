//! WebSocket channel transport
//!
//! The bearer token travels in the `Authorization` header of the upgrade
//! request. A 401/403 answer to the upgrade is reported as an authentication
//! failure; everything else is transient.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChannelConnector, ChannelTransport};
use crate::config::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::events::{InboundEvent, OutboundEvent};
use crate::{ChatError, Result};

/// Opens authenticated WebSocket channels
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }
}

impl WebSocketConnector {
    /// Create a connector with the given handshake timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn ChannelTransport>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ChatError::Configuration(format!("invalid channel url {}: {}", url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ChatError::Authentication("session token is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        debug!("Opening chat channel to {}", url);

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                ChatError::Transport(format!(
                    "handshake with {} timed out after {:?}",
                    url, self.connect_timeout
                ))
            })?;

        match handshake {
            Ok((stream, _response)) => {
                info!("Chat channel established with {}", url);
                Ok(Box::new(WebSocketTransport { stream }))
            }
            Err(tungstenite::Error::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                Err(ChatError::Authentication(format!(
                    "channel handshake rejected with status {}",
                    response.status()
                )))
            }
            Err(e) => Err(ChatError::Transport(format!("handshake with {} failed: {}", url, e))),
        }
    }
}

/// Established WebSocket channel
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn send_event(&mut self, event: &OutboundEvent) -> Result<()> {
        let frame = event.to_wire()?;
        self.stream
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| ChatError::Transport(format!("failed to send {}: {}", event.name(), e)))
    }

    async fn receive_event(&mut self) -> Result<Option<InboundEvent>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => match InboundEvent::from_wire(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => {
                        warn!("Skipping inbound frame: {}", e);
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("Chat channel closed by server: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(ChatError::Transport(format!("channel read failed: {}", e)));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ChatError::Transport(format!("failed to close channel: {}", e))),
        }
    }
}
