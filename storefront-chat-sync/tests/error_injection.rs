//! Error Injection Tests
//!
//! Tests error handling paths through simulated failures:
//! - Error classification into the four categories
//! - The shared error signal
//! - Reconnection budget bookkeeping
//! - Rejection of malformed channel frames

use std::time::Duration;

use serde_json::json;
use storefront_chat_sync::{
    ChannelConfig, ChatError, ErrorCategory, ErrorSignal, InboundEvent, OutboundEvent,
    ReconnectionStrategy, SendMessagePayload,
};

/// Test error classification for recoverable errors
#[test]
fn test_recoverable_error_classification() {
    let error = ChatError::Transport("connection reset".to_string());
    assert!(error.is_recoverable());
    assert!(!error.requires_user_action());
    assert_eq!(error.category(), ErrorCategory::Transport);
}

/// Test error classification for user action required errors
#[test]
fn test_user_action_required_classification() {
    // Rejected credential: terminal for the channel
    let error = ChatError::Authentication("token expired".to_string());
    assert!(!error.is_recoverable());
    assert!(error.requires_user_action());
    assert!(error.is_authentication());
    assert!(!error.notice().retryable);

    // Exhausted reconnection: user may reconnect
    let error = ChatError::ReconnectExhausted { attempts: 5 };
    assert!(!error.is_recoverable());
    assert!(error.requires_user_action());
    assert_eq!(error.category(), ErrorCategory::Transport);
    assert!(error.notice().retryable);
}

/// Test that request and caller errors are never retried
#[test]
fn test_request_and_application_classification() {
    let error = ChatError::RequestStatus {
        status: 503,
        message: "maintenance".to_string(),
    };
    assert_eq!(error.category(), ErrorCategory::Request);
    assert!(!error.is_recoverable());

    let error = ChatError::Request("conversation not found".to_string());
    assert_eq!(error.category(), ErrorCategory::Request);

    let error = ChatError::NoActiveConversation;
    assert_eq!(error.category(), ErrorCategory::Application);
    assert!(!error.is_recoverable());
    assert!(!error.requires_user_action());
}

/// Test user-friendly error messages
#[test]
fn test_error_user_messages() {
    let message = ChatError::Authentication("401".to_string()).user_message();
    assert!(message.contains("sign in"));

    let message = ChatError::ReconnectExhausted { attempts: 3 }.user_message();
    assert!(message.contains("reconnect"));

    let message = ChatError::RequestStatus {
        status: 500,
        message: String::new(),
    }
    .user_message();
    assert!(message.contains("500"));
}

/// Test the shared error signal keeps the latest error
#[tokio::test]
async fn test_error_signal_latest_wins() {
    let signal = ErrorSignal::new();
    let mut watcher = signal.subscribe();
    assert!(signal.current().is_none());

    signal.raise(&ChatError::Transport("dropped".to_string()));
    let notice = signal.raise(&ChatError::Request("bad page".to_string()));
    assert_eq!(notice.category, ErrorCategory::Request);

    watcher.changed().await.unwrap();
    let seen = watcher.borrow_and_update().clone().unwrap();
    assert_eq!(seen.category, ErrorCategory::Request);
    assert_eq!(seen.message, "Request failed: bad page");

    // Clones publish to the same signal
    let shared = signal.clone();
    shared.clear();
    assert!(signal.current().is_none());
}

/// Test the reconnection budget follows the channel settings
#[test]
fn test_reconnection_budget_from_config() {
    let config = ChannelConfig {
        reconnect_attempts: 2,
        reconnect_delay_ms: 300,
        ..ChannelConfig::default()
    };
    let mut strategy = ReconnectionStrategy::from(&config);

    assert_eq!(strategy.next_delay(), Some(Duration::from_millis(300)));
    assert_eq!(strategy.next_delay(), Some(Duration::from_millis(300)));
    assert_eq!(strategy.next_delay(), None);
    assert!(!strategy.has_attempts_remaining());

    strategy.reset();
    assert!(strategy.has_attempts_remaining());
}

/// Test malformed frames are rejected instead of reaching listeners
#[test]
fn test_malformed_frames_rejected() {
    let frames = [
        "not json".to_string(),
        json!({"event": "somethingElse", "data": {}}).to_string(),
        json!({"event": "newMessage", "data": {"id": "m1"}}).to_string(),
        json!({
            "event": "newMessage",
            "data": {
                "id": "",
                "conversationId": "c1",
                "senderId": "a",
                "senderType": "agent",
                "content": "hi",
                "createdAt": "2024-05-01T10:00:00Z"
            }
        })
        .to_string(),
        json!({
            "event": "userTyping",
            "data": {"conversationId": "c1", "userId": "", "isTyping": true}
        })
        .to_string(),
        // lifecycle events are local only
        json!({"event": "Connect", "data": null}).to_string(),
    ];

    for frame in &frames {
        let error = InboundEvent::from_wire(frame).unwrap_err();
        assert!(
            matches!(error, ChatError::InvalidEvent(_)),
            "frame {} gave {:?}",
            frame,
            error
        );
        assert_eq!(error.category(), ErrorCategory::Transport);
    }
}

/// Test server error frames in both shapes
#[test]
fn test_server_error_frames() {
    let text = json!({"event": "error", "data": "room is full"}).to_string();
    let object = json!({"event": "error", "data": {"message": "room is full", "code": "E42"}})
        .to_string();

    match InboundEvent::from_wire(&text).unwrap() {
        InboundEvent::Error(fault) => {
            assert_eq!(fault.message, "room is full");
            assert!(fault.code.is_none());
        }
        other => panic!("unexpected event {:?}", other),
    }
    match InboundEvent::from_wire(&object).unwrap() {
        InboundEvent::Error(fault) => assert_eq!(fault.code.as_deref(), Some("E42")),
        other => panic!("unexpected event {:?}", other),
    }
}

/// Test outbound frames carry the wire event names
#[test]
fn test_outbound_frame_shape() {
    let event = OutboundEvent::SendMessage(SendMessagePayload {
        conversation_id: "c1".to_string(),
        content: "hello".to_string(),
        receiver: Some("agent-1".to_string()),
        attachments: Vec::new(),
        message_id: None,
    });

    let frame: serde_json::Value = serde_json::from_str(&event.to_wire().unwrap()).unwrap();
    assert_eq!(
        frame,
        json!({
            "event": "send_message",
            "data": {"conversationId": "c1", "content": "hello", "receiver": "agent-1"}
        })
    );

    let join: serde_json::Value =
        serde_json::from_str(&OutboundEvent::JoinConversation("c9".to_string()).to_wire().unwrap())
            .unwrap();
    assert_eq!(join, json!({"event": "join_conversation", "data": "c9"}));
}
