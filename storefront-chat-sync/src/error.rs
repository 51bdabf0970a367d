//! Error handling for the chat synchronization core
//!
//! This module provides the error type shared by every component of the
//! sync core, plus the shared error signal that passive failures are
//! reported through.
//!
//! ## Error Categories
//!
//! ### Authentication
//! Missing or rejected bearer credential. Terminal for the channel instance;
//! the user has to sign in again before a new `connect` can succeed.
//!
//! ### Transport
//! Bidirectional channel failures (handshake, dropped session, socket errors).
//! Retried by the Channel Manager up to a bounded count. When the budget is
//! used up the distinct `ReconnectExhausted` error is surfaced, which the user
//! may retry by reconnecting.
//!
//! ### Request
//! Fallback request API failures (non-success envelope, HTTP status, decode
//! failures). Never retried automatically.
//!
//! ### Application
//! Caller misuse such as sending without an active conversation. Fails fast.
//!
//! ## Propagation
//!
//! ```rust
//! use storefront_chat_sync::{ChatError, ErrorCategory};
//!
//! let error = ChatError::NoActiveConversation;
//! assert_eq!(error.category(), ErrorCategory::Application);
//! assert!(!error.is_recoverable());
//!
//! let error = ChatError::ReconnectExhausted { attempts: 5 };
//! assert_eq!(error.category(), ErrorCategory::Transport);
//! assert!(error.requires_user_action());
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite;

/// Result type for sync core operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur while synchronizing conversations
///
/// # Automatic Conversions
///
/// - `serde_json::Error` → `ChatError::Json`
/// - `std::io::Error` → `ChatError::Io`
/// - `reqwest::Error` → `ChatError::Http`
/// - `tungstenite::Error` → `ChatError::WebSocket`
#[derive(Error, Debug)]
pub enum ChatError {
    /// Bearer credential missing or rejected by the chat service
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Bidirectional channel failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reconnection budget used up; the channel is back to `Disconnected`
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of reconnection attempts made
        attempts: u32,
    },

    /// Raw WebSocket error from the channel transport
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Fallback API answered with `success: false`
    #[error("Request failed: {0}")]
    Request(String),

    /// Fallback API answered with a non-2xx status
    #[error("Request failed with status {status}: {message}")]
    RequestStatus {
        /// HTTP status code
        status: u16,
        /// Server-provided message, if any
        message: String,
    },

    /// HTTP client error from the fallback API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Operation requires an active conversation
    #[error("No active conversation")]
    NoActiveConversation,

    /// Caller misuse
    #[error("Application error: {0}")]
    Application(String),

    /// Inbound channel frame failed schema validation
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (attachment files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse error class used by the shared error signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing/invalid credential, terminal until re-authentication
    Authentication,
    /// Channel connect/reconnect failure
    Transport,
    /// Fallback API failure
    Request,
    /// Caller misuse
    Application,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Request => write!(f, "request"),
            ErrorCategory::Application => write!(f, "application"),
        }
    }
}

impl ChatError {
    /// Map the error onto the four-class taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::Authentication(_) => ErrorCategory::Authentication,
            ChatError::Transport(_)
            | ChatError::ReconnectExhausted { .. }
            | ChatError::WebSocket(_)
            | ChatError::InvalidEvent(_) => ErrorCategory::Transport,
            ChatError::Request(_)
            | ChatError::RequestStatus { .. }
            | ChatError::Http(_)
            | ChatError::Json(_)
            | ChatError::Io(_) => ErrorCategory::Request,
            ChatError::NoActiveConversation
            | ChatError::Application(_)
            | ChatError::Configuration(_) => ErrorCategory::Application,
        }
    }

    /// Check if the Channel Manager may retry automatically
    ///
    /// # Examples
    ///
    /// ```rust
    /// use storefront_chat_sync::ChatError;
    ///
    /// assert!(ChatError::Transport("socket closed".to_string()).is_recoverable());
    /// assert!(!ChatError::Authentication("expired".to_string()).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChatError::Transport(_) | ChatError::WebSocket(_))
    }

    /// Check if the error is the terminal authentication failure
    pub fn is_authentication(&self) -> bool {
        matches!(self, ChatError::Authentication(_))
    }

    /// Check if the error cannot be resolved without the user
    ///
    /// Authentication failures need a new sign-in; exhausted reconnection
    /// needs the user to ask for a reconnect.
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ChatError::Authentication(_)
                | ChatError::ReconnectExhausted { .. }
                | ChatError::Configuration(_)
        )
    }

    /// Get a user-friendly error message suitable for display in UI
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Authentication(_) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ChatError::ReconnectExhausted { .. } => {
                "Lost connection to support chat. Tap to reconnect.".to_string()
            }
            ChatError::Transport(_) | ChatError::WebSocket(_) => {
                "Connection to support chat is unstable. Retrying...".to_string()
            }
            ChatError::InvalidEvent(_) => "Received an unexpected chat update.".to_string(),
            ChatError::Request(msg) => format!("Request failed: {}. Please try again.", msg),
            ChatError::RequestStatus { status, .. } => {
                format!("Server error ({}). Please try again.", status)
            }
            ChatError::Http(_) => "Network request failed. Check your connection.".to_string(),
            ChatError::NoActiveConversation => "Open a conversation first.".to_string(),
            ChatError::Application(msg) => format!("{}.", msg),
            ChatError::Json(_) => "Received malformed data from the server.".to_string(),
            ChatError::Io(e) => format!("Could not read file: {}.", e),
            ChatError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
        }
    }

    /// Snapshot the error for the shared error signal
    pub fn notice(&self) -> ErrorNotice {
        ErrorNotice {
            category: self.category(),
            message: self.to_string(),
            retryable: !matches!(self, ChatError::Authentication(_)),
        }
    }

    /// Create an application (caller misuse) error
    pub fn application(msg: impl Into<String>) -> Self {
        ChatError::Application(msg.into())
    }

    /// Create an invalid event error
    pub fn invalid_event(msg: impl Into<String>) -> Self {
        ChatError::InvalidEvent(msg.into())
    }
}

/// Cloneable snapshot of an error, published on the [`ErrorSignal`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Error class
    pub category: ErrorCategory,
    /// Display message of the underlying error
    pub message: String,
    /// Whether re-invoking the action (or reconnecting) may succeed
    pub retryable: bool,
}

/// Shared "last error" signal
///
/// Transport failures and absorbed passive-load failures land here instead of
/// being thrown into unrelated callers.
#[derive(Debug, Clone)]
pub struct ErrorSignal {
    tx: Arc<watch::Sender<Option<ErrorNotice>>>,
}

impl Default for ErrorSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSignal {
    /// Create an empty signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publish an error
    pub fn raise(&self, error: &ChatError) -> ErrorNotice {
        let notice = error.notice();
        self.tx.send_replace(Some(notice.clone()));
        notice
    }

    /// Clear the current error
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Latest published error, if any
    pub fn current(&self) -> Option<ErrorNotice> {
        self.tx.borrow().clone()
    }

    /// Watch the signal for changes
    pub fn subscribe(&self) -> watch::Receiver<Option<ErrorNotice>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ChatError::Authentication("missing session token".to_string());
        assert_eq!(
            error.to_string(),
            "Authentication failed: missing session token"
        );

        let error = ChatError::ReconnectExhausted { attempts: 5 };
        assert_eq!(error.to_string(), "Reconnection failed after 5 attempts");

        let error = ChatError::RequestStatus {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Request failed with status 502: bad gateway"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json = r#"{"invalid json"#;
        let json_error = serde_json::from_str::<serde_json::Value>(json).unwrap_err();
        let error: ChatError = json_error.into();

        assert!(matches!(error, ChatError::Json(_)));
        assert_eq!(error.category(), ErrorCategory::Request);
    }

    #[test]
    fn test_notice_retryable() {
        let notice = ChatError::Authentication("expired".to_string()).notice();
        assert_eq!(notice.category, ErrorCategory::Authentication);
        assert!(!notice.retryable);

        let notice = ChatError::ReconnectExhausted { attempts: 3 }.notice();
        assert_eq!(notice.category, ErrorCategory::Transport);
        assert!(notice.retryable);
    }

    #[test]
    fn test_error_signal() {
        let signal = ErrorSignal::new();
        assert!(signal.current().is_none());

        let rx = signal.subscribe();
        signal.raise(&ChatError::Request("list failed".to_string()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            signal.current().map(|n| n.category),
            Some(ErrorCategory::Request)
        );

        signal.clear();
        assert!(signal.current().is_none());
    }
}
