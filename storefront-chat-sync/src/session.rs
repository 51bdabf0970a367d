//! Chat Session
//!
//! Session-scoped owner of the channel manager, the dispatcher and the error
//! signal. One `ChatSession` exists per signed-in user; dropping it tears the
//! channel down.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::ChannelManager;
use crate::config::ChatConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ErrorSignal;
use crate::fallback::{FallbackClient, HttpFallbackClient};
use crate::model::ChannelState;
use crate::store::{StoreListener, SubscriptionId};
use crate::token::TokenProvider;
use crate::transport::{ChannelConnector, WebSocketConnector};
use crate::Result;

/// Everything one signed-in user needs to chat with support
pub struct ChatSession {
    config: ChatConfig,
    channel: Arc<ChannelManager>,
    dispatcher: Arc<Dispatcher>,
    tokens: Arc<dyn TokenProvider>,
    errors: ErrorSignal,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Assemble a session from explicit collaborators
    pub fn new(
        config: ChatConfig,
        connector: Arc<dyn ChannelConnector>,
        fallback: Arc<dyn FallbackClient>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let errors = ErrorSignal::new();
        let channel = Arc::new(ChannelManager::new(
            config.channel.clone(),
            connector,
            errors.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            channel.clone(),
            fallback,
            config.conversations.clone(),
            errors.clone(),
        )
        .with_active_receipts(config.channel.acknowledge_active));

        Self {
            config,
            channel,
            dispatcher,
            tokens,
            errors,
            pump: Mutex::new(None),
        }
    }

    /// Session over WebSocket and HTTP
    pub fn with_defaults(config: ChatConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let connector = Arc::new(WebSocketConnector::new(config.channel.connect_timeout()));
        let fallback = Arc::new(HttpFallbackClient::new(&config.api, tokens.clone())?);
        Ok(Self::new(config, connector, fallback, tokens))
    }

    /// Open the channel with the current session token
    ///
    /// Inbound events start flowing into the stores before the handshake so
    /// that the first `connect` event is not missed.
    pub async fn connect(&self) -> Result<()> {
        self.start_pump().await;
        let token = self.tokens.bearer_token().await;
        self.channel.connect(token.as_deref()).await
    }

    /// Close the channel
    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    async fn start_pump(&self) {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let mut events = self.channel.subscribe().await;
        let dispatcher = self.dispatcher.clone();
        *pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatcher.handle_inbound(event).await;
            }
            debug!("Inbound event pump stopped");
        }));
        info!("Chat session started");
    }

    /// Current channel state
    pub fn state(&self) -> ChannelState {
        self.channel.current_state()
    }

    /// Action and query entry point
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The channel manager
    pub fn channel(&self) -> &Arc<ChannelManager> {
        &self.channel
    }

    /// Shared error signal
    pub fn errors(&self) -> &ErrorSignal {
        &self.errors
    }

    /// Configuration the session was built with
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Register a store listener
    pub async fn subscribe(&self, listener: Arc<dyn StoreListener>) -> SubscriptionId {
        self.dispatcher.subscribe(listener).await
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.try_lock() {
            if let Some(task) = pump.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InboundEvent;
    use crate::store::StoreChange;
    use crate::test_utils::{agent_message, settle, wait_until, MockConnector, MockFallback};
    use crate::token::StaticTokenProvider;
    use crate::ChatError;
    use std::sync::Mutex as StdMutex;

    fn session(tokens: StaticTokenProvider) -> (ChatSession, MockConnector) {
        let connector = MockConnector::new();
        let session = ChatSession::new(
            ChatConfig::default(),
            Arc::new(connector.clone()),
            Arc::new(MockFallback::new()),
            Arc::new(tokens),
        );
        (session, connector)
    }

    #[tokio::test]
    async fn test_signed_out_connect_fails_fast() {
        let (session, connector) = session(StaticTokenProvider::signed_out());
        let result = session.connect().await;
        assert!(matches!(result, Err(ChatError::Authentication(_))));
        assert_eq!(connector.attempts(), 0);
        assert_eq!(session.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_inbound_events_reach_stores() {
        let (session, connector) = session(StaticTokenProvider::new("secret"));
        let changes = Arc::new(StdMutex::new(Vec::new()));
        let sink = changes.clone();
        session
            .subscribe(Arc::new(move |change: &StoreChange| {
                sink.lock().unwrap().push(change.clone())
            }))
            .await;

        session.connect().await.unwrap();
        assert!(wait_until(|| session.state() == ChannelState::Connected).await);
        assert_eq!(connector.tokens(), vec!["secret".to_string()]);

        connector
            .link(0)
            .push(InboundEvent::NewMessage(agent_message("m1", "c1")));
        let dispatcher = session.dispatcher().clone();
        assert!(wait_until(|| changes
            .lock()
            .unwrap()
            .contains(&StoreChange::UnreadChanged { total: 1 }))
        .await);
        assert_eq!(dispatcher.messages("c1").await.len(), 1);
        assert!(changes
            .lock()
            .unwrap()
            .contains(&StoreChange::ChannelState(ChannelState::Connected)));

        session.disconnect().await;
        settle().await;
        assert_eq!(session.state(), ChannelState::Disconnected);
        assert!(changes
            .lock()
            .unwrap()
            .contains(&StoreChange::ChannelState(ChannelState::Disconnected)));
    }
}
