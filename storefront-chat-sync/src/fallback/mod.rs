//! Fallback Request Client
//!
//! Stateless request/response API used for everything the channel does not
//! carry: listing conversations, paging history, sending to synthetic
//! conversations (or to peers while the channel is down), read receipts and
//! attachment upload.
//!
//! Every response is wrapped in an envelope:
//!
//! ```json
//! {"success": true, "data": [...]}
//! {"success": false, "message": "conversation not found"}
//! ```

pub mod http;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Conversation, Message};
use crate::{ChatError, Result};

pub use http::HttpFallbackClient;

/// Body of `POST message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target conversation; absent when creating a new conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Text content
    pub message: String,

    /// Subject of a new conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Routing hint for the service (`text`, `ai`, `shop`)
    pub message_type: String,

    /// Attachment URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,

    /// Other participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
}

/// File to upload as an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    /// File name reported to the service
    pub file_name: String,
    /// MIME type, if known
    pub mime_type: Option<String>,
    /// File content
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    /// Create an upload from in-memory content
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes,
        }
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read a local file
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ChatError::application(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(file_name, bytes))
    }
}

/// Standard response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Whether the service accepted the request
    pub success: bool,

    /// Payload on success
    #[serde(default = "Option::default")]
    pub data: Option<T>,

    /// Failure description
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, mapping `success: false` to `ChatError::Request`
    pub fn into_data(self) -> Result<T> {
        if !self.success {
            return Err(ChatError::Request(
                self.message
                    .unwrap_or_else(|| "service reported failure".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ChatError::Request("response carried no data".to_string()))
    }

    /// Check the success flag only
    pub fn ensure_success(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(ChatError::Request(
                self.message
                    .unwrap_or_else(|| "service reported failure".to_string()),
            ))
        }
    }
}

/// Response of `POST uploadAttachment`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// Whether the upload was accepted
    pub success: bool,

    /// Public URL of the stored file
    #[serde(default)]
    pub url: Option<String>,

    /// Failure description
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadResponse {
    /// Unwrap the URL
    pub fn into_url(self) -> Result<String> {
        match (self.success, self.url) {
            (true, Some(url)) if !url.is_empty() => Ok(url),
            (true, _) => Err(ChatError::Request("upload returned no url".to_string())),
            (false, _) => Err(ChatError::Request(
                self.message.unwrap_or_else(|| "upload rejected".to_string()),
            )),
        }
    }
}

/// Stateless chat request API
#[async_trait]
pub trait FallbackClient: Send + Sync {
    /// `GET conversations`
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// `GET messages(conversationId, page)`; pages are 1-based
    async fn list_messages(&self, conversation_id: &str, page: u32) -> Result<Vec<Message>>;

    /// `POST message`
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message>;

    /// `POST markRead(conversationId)`
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;

    /// `POST uploadAttachment(file)`, returning the attachment URL
    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_envelope_success() {
        let envelope: ApiEnvelope<Vec<Conversation>> =
            serde_json::from_str(r#"{"success": true, "data": [{"id": "c1", "unreadCount": 3}]}"#)
                .unwrap();
        let conversations = envelope.into_data().unwrap();
        assert_eq!(conversations[0].unread_count, 3);
    }

    #[test]
    fn test_envelope_failure() {
        let envelope: ApiEnvelope<Vec<Conversation>> =
            serde_json::from_str(r#"{"success": false, "message": "not allowed"}"#).unwrap();
        match envelope.into_data() {
            Err(ChatError::Request(msg)) => assert_eq!(msg, "not allowed"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_send_request_omits_absent_fields() {
        let request = SendMessageRequest {
            conversation_id: Some("c1".to_string()),
            message: "hello".to_string(),
            subject: None,
            message_type: "text".to_string(),
            attachments: Vec::new(),
            receiver: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"conversationId": "c1", "message": "hello", "messageType": "text"})
        );
    }

    #[test]
    fn test_upload_response() {
        let ok: UploadResponse =
            serde_json::from_str(r#"{"success": true, "url": "https://cdn/x.png"}"#).unwrap();
        assert_eq!(ok.into_url().unwrap(), "https://cdn/x.png");

        let missing: UploadResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(missing.into_url().is_err());
    }

    #[tokio::test]
    async fn test_attachment_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"receipt").unwrap();

        let upload = AttachmentUpload::from_path(file.path()).await.unwrap();
        assert_eq!(upload.bytes, b"receipt");
        assert!(!upload.file_name.is_empty());
    }
}
