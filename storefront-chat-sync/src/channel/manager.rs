//! Channel Manager
//!
//! Owns the lifecycle of the bidirectional channel: authenticated connect,
//! bounded reconnection with a fixed delay, automatic room rejoin and
//! teardown. A single background task owns the transport; everything else
//! talks to it through [`ChannelCommand`]s.
//!
//! ## State machine
//!
//! ```text
//! Disconnected --connect(token)--> Connecting --ok--> Connected
//! Connecting | Connected --transient failure--> Reconnecting
//! Reconnecting --ok--> Connected
//! Reconnecting --attempts exhausted--> Disconnected (ReconnectExhausted)
//! Connecting | Reconnecting --auth rejected--> Disconnected (Authentication)
//! any --disconnect()--> Disconnected
//! ```
//!
//! Emits are only delivered while `Connected`. Anything emitted in another
//! state is dropped, never buffered.
//!
//! `Connected` is published only after the recorded room has been joined on
//! the new transport, so a successful [`ChannelManager::connect`] returns a
//! usable channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::error::ErrorSignal;
use crate::events::{InboundEvent, OutboundEvent};
use crate::model::ChannelState;
use crate::recovery::ReconnectionStrategy;
use crate::transport::{ChannelConnector, ChannelTransport, WebSocketConnector};
use crate::{ChatError, Result};

/// Callback registered with [`ChannelManager::on`]
pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Commands that can be sent to the connection task
enum ChannelCommand {
    /// Write an event to the channel
    Emit(OutboundEvent),
    /// Close the channel and stop the task
    Close,
}

/// Running connection task
struct ActiveConnection {
    /// Channel to send commands to the connection task
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Task owning the transport
    task: JoinHandle<()>,
}

/// How an established session ended
enum SessionEnd {
    /// Closed on request
    Closed,
    /// Lost; reconnection should start
    Dropped(String),
}

/// State shared between the manager and its connection task
#[derive(Clone)]
struct Shared {
    url: String,
    connector: Arc<dyn ChannelConnector>,
    state: Arc<watch::Sender<ChannelState>>,
    active_room: Arc<RwLock<Option<String>>>,
    outbox: Arc<RwLock<Option<mpsc::UnboundedSender<ChannelCommand>>>>,
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<InboundEvent>>>>,
    errors: ErrorSignal,
}

impl Shared {
    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!("Chat channel {}", next);
        }
    }

    async fn open(&self, token: &str) -> Result<Box<dyn ChannelTransport>> {
        self.connector.connect(&self.url, token).await
    }

    /// Join the recorded room on a fresh transport, then publish `Connected`
    ///
    /// The room lock is held until the state is published: a concurrent
    /// [`ChannelManager::join_room`] either lands first and is joined here, or
    /// lands after and emits its own join.
    async fn bring_up(&self, transport: &mut Box<dyn ChannelTransport>) -> Result<()> {
        let room = self.active_room.read().await;
        if let Some(room) = room.as_ref() {
            debug!("Joining conversation room {}", room);
            transport
                .send_event(&OutboundEvent::JoinConversation(room.clone()))
                .await?;
        }
        self.set_state(ChannelState::Connected);
        Ok(())
    }

    /// Queue an event for the connection task if `Connected`
    async fn send(&self, event: OutboundEvent) -> bool {
        let state = *self.state.borrow();
        if state != ChannelState::Connected {
            debug!("Dropping {} while chat channel is {}", event.name(), state);
            return false;
        }

        match self.outbox.read().await.as_ref() {
            Some(tx) => tx.send(ChannelCommand::Emit(event)).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to registered handlers, then to subscribers
    async fn deliver(&self, event: InboundEvent) {
        let handlers = self
            .handlers
            .read()
            .await
            .get(event.name())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(&event);
        }

        self.subscribers
            .write()
            .await
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Surface a failure that stops the channel for good
    async fn fail(&self, error: &ChatError, event: InboundEvent) {
        self.errors.raise(error);
        self.deliver(event).await;
        self.set_state(ChannelState::Disconnected);
    }
}

/// Manager for the single bidirectional chat channel
pub struct ChannelManager {
    config: ChannelConfig,
    shared: Shared,
    connection: Mutex<Option<ActiveConnection>>,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("url", &self.config.url)
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    /// Create a manager using `connector` to open channels
    pub fn new(
        config: ChannelConfig,
        connector: Arc<dyn ChannelConnector>,
        errors: ErrorSignal,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let shared = Shared {
            url: config.url.clone(),
            connector,
            state: Arc::new(state),
            active_room: Arc::new(RwLock::new(None)),
            outbox: Arc::new(RwLock::new(None)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            errors,
        };

        Self {
            config,
            shared,
            connection: Mutex::new(None),
        }
    }

    /// Create a manager backed by the WebSocket transport
    pub fn websocket(config: ChannelConfig, errors: ErrorSignal) -> Self {
        let connector = Arc::new(WebSocketConnector::new(config.connect_timeout()));
        Self::new(config, connector, errors)
    }

    /// Open the channel with a bearer token
    ///
    /// On success the channel is `Connected` and the recorded room joined by
    /// the time this returns. A missing token fails fast with
    /// `ChatError::Authentication` without touching the network. A rejected
    /// token is terminal and returned as an error. A transient handshake
    /// failure is not returned: the manager moves to `Reconnecting`, reports
    /// the failure on the error signal and retries in the background.
    ///
    /// Calling `connect` while connected or reconnecting is a no-op.
    pub async fn connect(&self, token: Option<&str>) -> Result<()> {
        let token = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => {
                debug!("Not connecting chat channel: no session token");
                return Err(ChatError::Authentication(
                    "no session token available".to_string(),
                ));
            }
        };

        let mut connection = self.connection.lock().await;
        let state = self.current_state();
        if matches!(state, ChannelState::Connected | ChannelState::Reconnecting) {
            debug!("Chat channel already {}", state);
            return Ok(());
        }
        if let Some(stale) = connection.take() {
            stale.task.abort();
        }

        self.shared.set_state(ChannelState::Connecting);
        let strategy = ReconnectionStrategy::from(&self.config);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.shared.outbox.write().await = Some(command_tx.clone());

        let opened = match self.shared.open(&token).await {
            Ok(mut transport) => self
                .shared
                .bring_up(&mut transport)
                .await
                .map(|()| transport),
            Err(e) => Err(e),
        };

        let initial = match opened {
            Ok(transport) => Some(transport),
            Err(e) if e.is_authentication() => {
                warn!("Chat channel rejected credentials: {}", e);
                *self.shared.outbox.write().await = None;
                let message = e.to_string();
                self.shared
                    .fail(&e, InboundEvent::ConnectError { message })
                    .await;
                return Err(e);
            }
            Err(e) => {
                warn!("Chat channel handshake failed: {}", e);
                self.shared.set_state(ChannelState::Reconnecting);
                self.shared.errors.raise(&e);
                self.shared
                    .deliver(InboundEvent::ConnectError {
                        message: e.to_string(),
                    })
                    .await;
                None
            }
        };

        let task = tokio::spawn(run_channel(
            self.shared.clone(),
            token,
            initial,
            command_rx,
            strategy,
        ));
        *connection = Some(ActiveConnection { command_tx, task });

        Ok(())
    }

    /// Close the channel and reset the state to `Disconnected`
    pub async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;
        let previous = self.current_state();

        if let Some(active) = connection.take() {
            let _ = active.command_tx.send(ChannelCommand::Close);
            let mut task = active.task;
            if tokio::time::timeout(self.config.connect_timeout(), &mut task)
                .await
                .is_err()
            {
                warn!("Chat channel task did not stop in time, aborting");
                task.abort();
            }
        }
        *self.shared.outbox.write().await = None;

        self.shared.set_state(ChannelState::Disconnected);
        if previous != ChannelState::Disconnected {
            self.shared
                .deliver(InboundEvent::Disconnect {
                    reason: "client disconnect".to_string(),
                })
                .await;
        }
    }

    /// Current channel state
    pub fn current_state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Watch channel state changes
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Register a handler for an inbound event name
    ///
    /// Handlers run on the connection task, in registration order, before
    /// the event reaches [`subscribe`](Self::subscribe) receivers. They must
    /// not block.
    pub async fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .await
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Get a receiver for every inbound event, in channel order
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.write().await.push(tx);
        rx
    }

    /// Emit an event if the channel is `Connected`
    ///
    /// Returns `false` when the event was dropped.
    pub async fn emit(&self, event: OutboundEvent) -> bool {
        self.shared.send(event).await
    }

    /// Record `room` for rejoin and join it now when `Connected`
    ///
    /// Exactly one join reaches a connection whether this races a
    /// (re)connect or not. Returns whether a join was emitted here.
    pub async fn join_room(&self, room: &str) -> bool {
        let mut active = self.shared.active_room.write().await;
        *active = Some(room.to_string());
        self.shared
            .send(OutboundEvent::JoinConversation(room.to_string()))
            .await
    }

    /// Record the peer room to join on every (re)connect, without joining it
    pub async fn set_active_room(&self, room: Option<String>) {
        *self.shared.active_room.write().await = room;
    }

    /// Room currently recorded for rejoin
    pub async fn active_room(&self) -> Option<String> {
        self.shared.active_room.read().await.clone()
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Ok(mut connection) = self.connection.try_lock() {
            if let Some(active) = connection.take() {
                active.task.abort();
            }
        }
    }
}

/// Connection task: alternate between sessions and reconnection until closed
async fn run_channel(
    shared: Shared,
    token: String,
    initial: Option<Box<dyn ChannelTransport>>,
    mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    mut strategy: ReconnectionStrategy,
) {
    let mut pending = initial.map(|transport| (transport, 0));

    loop {
        let (transport, attempt) = match pending.take() {
            Some(established) => established,
            None => match reconnect(&shared, &token, &mut command_rx, &mut strategy).await {
                Some(established) => established,
                None => return,
            },
        };

        match run_session(&shared, transport, attempt, &mut command_rx, &mut strategy).await {
            SessionEnd::Closed => {
                info!("Chat channel closed");
                return;
            }
            SessionEnd::Dropped(reason) => {
                warn!("Chat channel dropped: {}", reason);
                shared.set_state(ChannelState::Reconnecting);
                shared.deliver(InboundEvent::Disconnect { reason }).await;
            }
        }
    }
}

/// Drive one established session
async fn run_session(
    shared: &Shared,
    mut transport: Box<dyn ChannelTransport>,
    attempt: u32,
    command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    strategy: &mut ReconnectionStrategy,
) -> SessionEnd {
    strategy.reset();
    shared.deliver(InboundEvent::Connect).await;
    if attempt > 0 {
        shared.deliver(InboundEvent::Reconnect { attempt }).await;
    }

    let end = loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(ChannelCommand::Emit(event)) => {
                    debug!("Emitting {} for {}", event.name(), event.conversation_id());
                    if let Err(e) = transport.send_event(&event).await {
                        error!("Failed to emit {}: {}", event.name(), e);
                        break SessionEnd::Dropped(e.to_string());
                    }
                }
                Some(ChannelCommand::Close) | None => break SessionEnd::Closed,
            },
            result = transport.receive_event() => match result {
                Ok(Some(event)) => {
                    debug!("Received {}", event.name());
                    shared.deliver(event).await;
                }
                Ok(None) => break SessionEnd::Dropped("transport close".to_string()),
                Err(e) => break SessionEnd::Dropped(e.to_string()),
            },
        }
    };

    if matches!(end, SessionEnd::Closed) {
        if let Err(e) = transport.close().await {
            debug!("Error while closing chat channel: {}", e);
        }
    }
    end
}

/// Retry the handshake with a fixed delay until it succeeds or the budget runs out
async fn reconnect(
    shared: &Shared,
    token: &str,
    command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    strategy: &mut ReconnectionStrategy,
) -> Option<(Box<dyn ChannelTransport>, u32)> {
    while let Some(delay) = strategy.next_delay() {
        let attempt = strategy.attempt;
        info!("Reconnecting chat channel ({})", strategy.status());

        let outcome = tokio::select! {
            outcome = async {
                tokio::time::sleep(delay).await;
                shared.open(token).await
            } => outcome,
            _ = wait_for_close(command_rx) => {
                info!("Chat channel reconnection cancelled");
                return None;
            }
        };

        let outcome = match outcome {
            Ok(mut transport) => shared.bring_up(&mut transport).await.map(|()| transport),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(transport) => return Some((transport, attempt)),
            Err(e) if e.is_authentication() => {
                warn!("Chat channel rejected credentials on reconnect: {}", e);
                let message = e.to_string();
                shared
                    .fail(&e, InboundEvent::ConnectError { message })
                    .await;
                return None;
            }
            Err(e) => {
                debug!("Reconnection attempt {} failed: {}", attempt, e);
                shared
                    .deliver(InboundEvent::ReconnectError {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }

    error!(
        "Chat channel reconnection exhausted after {} attempts",
        strategy.max_attempts
    );
    shared
        .fail(
            &ChatError::ReconnectExhausted {
                attempts: strategy.max_attempts,
            },
            InboundEvent::ReconnectFailed,
        )
        .await;
    None
}

/// Resolve once a close is requested, dropping emits meanwhile
async fn wait_for_close(command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>) {
    loop {
        match command_rx.recv().await {
            Some(ChannelCommand::Emit(event)) => {
                debug!("Dropping {} while reconnecting", event.name());
            }
            Some(ChannelCommand::Close) | None => return,
        }
    }
}
