//! In-memory doubles for the channel transport and the fallback API

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::events::{InboundEvent, OutboundEvent};
use crate::fallback::{AttachmentUpload, FallbackClient, SendMessageRequest};
use crate::model::{Conversation, Message, SenderType};
use crate::transport::{ChannelConnector, ChannelTransport};
use crate::{ChatError, Result};

/// Poll `condition` every 10ms (virtual time when paused) for up to 5s
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let spawned tasks run until they are idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Scripted handshake result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handshake succeeds
    Accept,
    /// Credentials rejected
    Reject,
    /// Transient network failure
    Fail,
}

enum LinkSignal {
    Event(InboundEvent),
    Drop,
}

/// Test-side handle of one established mock channel
#[derive(Debug, Clone)]
pub struct MockLink {
    inbound: mpsc::UnboundedSender<LinkSignal>,
    sent: Arc<Mutex<Vec<OutboundEvent>>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for LinkSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSignal::Event(event) => write!(f, "Event({})", event.name()),
            LinkSignal::Drop => write!(f, "Drop"),
        }
    }
}

impl MockLink {
    /// Deliver an event from the "server"
    pub fn push(&self, event: InboundEvent) {
        let _ = self.inbound.send(LinkSignal::Event(event));
    }

    /// Break the link with a transport error
    pub fn drop_link(&self) {
        let _ = self.inbound.send(LinkSignal::Drop);
    }

    /// Events written by the client on this link
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the client closed the link
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Client side of a mock channel
#[derive(Debug)]
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<LinkSignal>,
    sent: Arc<Mutex<Vec<OutboundEvent>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn send_event(&mut self, event: &OutboundEvent) -> Result<()> {
        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn receive_event(&mut self) -> Result<Option<InboundEvent>> {
        match self.inbound.recv().await {
            Some(LinkSignal::Event(event)) => Ok(Some(event)),
            Some(LinkSignal::Drop) => Err(ChatError::Transport("link dropped".to_string())),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    script: VecDeque<ConnectOutcome>,
    attempts: u32,
    tokens: Vec<String>,
    links: Vec<MockLink>,
}

/// Connector handing out [`MockTransport`]s; accepts by default
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue handshake outcomes; once drained every handshake succeeds
    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    /// Number of handshakes attempted
    pub fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }

    /// Tokens presented on each handshake
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    /// Links established so far
    pub fn links(&self) -> Vec<MockLink> {
        self.state.lock().unwrap().links.clone()
    }

    /// The `index`-th established link
    pub fn link(&self, index: usize) -> MockLink {
        self.links()[index].clone()
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, _url: &str, token: &str) -> Result<Box<dyn ChannelTransport>> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        state.tokens.push(token.to_string());

        match state.script.pop_front().unwrap_or(ConnectOutcome::Accept) {
            ConnectOutcome::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                let sent = Arc::new(Mutex::new(Vec::new()));
                let closed = Arc::new(AtomicBool::new(false));
                state.links.push(MockLink {
                    inbound: tx,
                    sent: sent.clone(),
                    closed: closed.clone(),
                });
                Ok(Box::new(MockTransport {
                    inbound: rx,
                    sent,
                    closed,
                }))
            }
            ConnectOutcome::Reject => Err(ChatError::Authentication(
                "handshake rejected with status 401".to_string(),
            )),
            ConnectOutcome::Fail => Err(ChatError::Transport("connection refused".to_string())),
        }
    }
}

/// Request recorded by [`MockFallback`]
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackCall {
    ListConversations,
    ListMessages { conversation_id: String, page: u32 },
    SendMessage(SendMessageRequest),
    MarkRead(String),
    Upload(String),
}

#[derive(Debug, Default)]
struct FallbackState {
    conversations: Vec<Conversation>,
    pages: HashMap<(String, u32), Vec<Message>>,
    failing: HashSet<&'static str>,
    message_delay: Option<Duration>,
    calls: Vec<FallbackCall>,
    next_id: u32,
}

/// Scripted fallback API
#[derive(Debug, Clone, Default)]
pub struct MockFallback {
    state: Arc<Mutex<FallbackState>>,
}

impl MockFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversations returned by `list_conversations`
    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.state.lock().unwrap().conversations = conversations;
    }

    /// Messages returned for one page
    pub fn set_page(&self, conversation_id: &str, page: u32, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert((conversation_id.to_string(), page), messages);
    }

    /// Make an operation (`list_conversations`, `list_messages`,
    /// `send_message`, `mark_read`, `upload_attachment`) fail
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// Delay `list_messages` responses
    pub fn delay_messages(&self, delay: Duration) {
        self.state.lock().unwrap().message_delay = Some(delay);
    }

    /// Every request made so far
    pub fn calls(&self) -> Vec<FallbackCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of `send_message` requests
    pub fn sent_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, FallbackCall::SendMessage(_)))
            .count()
    }

    fn record(&self, call: FallbackCall, operation: &'static str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(ChatError::Request(format!("{} failed", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl FallbackClient for MockFallback {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.record(FallbackCall::ListConversations, "list_conversations")?;
        Ok(self.state.lock().unwrap().conversations.clone())
    }

    async fn list_messages(&self, conversation_id: &str, page: u32) -> Result<Vec<Message>> {
        let delay = self.state.lock().unwrap().message_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(
            FallbackCall::ListMessages {
                conversation_id: conversation_id.to_string(),
                page,
            },
            "list_messages",
        )?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pages
            .get(&(conversation_id.to_string(), page))
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message> {
        self.record(FallbackCall::SendMessage(request.clone()), "send_message")?;

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let n = state.next_id;
        let conversation_id = match &request.conversation_id {
            Some(id) => id.clone(),
            None => {
                let id = format!("new-{}", n);
                let mut conversation = Conversation::placeholder(&id);
                conversation.subject = request.subject.clone().unwrap_or_default();
                state.conversations.insert(0, conversation);
                id
            }
        };

        Ok(Message {
            id: format!("srv-{}", n),
            conversation_id,
            sender_id: "customer-1".to_string(),
            // some backends echo the routing type; the client must not trust it
            sender_type: SenderType::System,
            content: request.message.clone(),
            attachments: request.attachments.clone(),
            created_at: Utc::now(),
            is_read: false,
        })
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.record(FallbackCall::MarkRead(conversation_id.to_string()), "mark_read")
    }

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<String> {
        self.record(FallbackCall::Upload(upload.file_name.clone()), "upload_attachment")?;
        Ok(format!("https://cdn.test/{}", upload.file_name))
    }
}

/// Message from a support agent
pub fn agent_message(id: &str, conversation_id: &str) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: "agent-1".to_string(),
        sender_type: SenderType::Agent,
        content: format!("agent says {}", id),
        attachments: Vec::new(),
        created_at: Utc::now(),
        is_read: false,
    }
}

/// Conversation with a server-reported unread count
pub fn conversation(id: &str, unread: u32) -> Conversation {
    Conversation {
        unread_count: unread,
        participant_id: Some(format!("agent-of-{}", id)),
        ..Conversation::placeholder(id)
    }
}
