//! HTTP implementation of the fallback request API

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiEnvelope, AttachmentUpload, FallbackClient, SendMessageRequest, UploadResponse};
use crate::config::ApiConfig;
use crate::model::{Conversation, Message};
use crate::token::TokenProvider;
use crate::{ChatError, Result};

/// REST client for the chat service
pub struct HttpFallbackClient {
    base_url: Url,
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for HttpFallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFallbackClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpFallbackClient {
    /// Create a client for `config.base_url`
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ChatError::Configuration(format!("invalid api base url {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::Configuration(format!(
                "api base url {} cannot carry a path",
                config.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("storefront-chat-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url,
            http,
            tokens,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base() was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.bearer_token().await.ok_or_else(|| {
            ChatError::Authentication("no session token for chat request".to_string())
        })?;
        Ok(builder.bearer_auth(token))
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.authorized(builder).await?.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Chat request failed with status {}: {}", status, message);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ChatError::Authentication(format!("chat request rejected with {}", status))
                }
                _ => ChatError::RequestStatus {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl FallbackClient for HttpFallbackClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let url = self.endpoint(&["conversations"]);
        debug!("GET {}", url);
        self.execute::<ApiEnvelope<Vec<Conversation>>>(self.http.get(url))
            .await?
            .into_data()
    }

    async fn list_messages(&self, conversation_id: &str, page: u32) -> Result<Vec<Message>> {
        let url = self.endpoint(&["conversations", conversation_id, "messages"]);
        debug!("GET {} page={}", url, page);
        self.execute::<ApiEnvelope<Vec<Message>>>(
            self.http.get(url).query(&[("page", page.to_string())]),
        )
        .await?
        .into_data()
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message> {
        let url = self.endpoint(&["messages"]);
        debug!(
            "POST {} conversation={:?} type={}",
            url, request.conversation_id, request.message_type
        );
        self.execute::<ApiEnvelope<Message>>(self.http.post(url).json(request))
            .await?
            .into_data()
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.endpoint(&["conversations", conversation_id, "read"]);
        debug!("POST {}", url);
        self.execute::<ApiEnvelope<serde_json::Value>>(self.http.post(url))
            .await?
            .ensure_success()
    }

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<String> {
        let url = self.endpoint(&["attachments"]);
        debug!("POST {} file={} ({} bytes)", url, upload.file_name, upload.bytes.len());

        let mut part = multipart::Part::bytes(upload.bytes).file_name(upload.file_name);
        if let Some(mime_type) = upload.mime_type.as_deref() {
            part = part.mime_str(mime_type)?;
        }
        let form = multipart::Form::new().part("file", part);

        self.execute::<UploadResponse>(self.http.post(url).multipart(form))
            .await?
            .into_url()
    }
}
