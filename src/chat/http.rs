//! HTTP chat backend (`POST {base}/chat`).

use super::{ChatBackend, ChatError, ChatReply, ChatRequest};
use crate::error::ConfigError;
use crate::settings::WidgetSettings;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub struct HttpChatBackend {
    client: Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpChatBackend {
    pub fn from_settings(settings: &WidgetSettings) -> Result<Self, ConfigError> {
        Self::with_client(Client::new(), settings)
    }

    /// Create with custom client and settings
    pub fn with_client(client: Client, settings: &WidgetSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            url: format!("{}/chat", settings.require_api_base_url()?),
            api_key: settings.chat_api_key.clone(),
            timeout: settings.chat_timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, e: reqwest::Error) -> ChatError {
        if e.is_timeout() {
            ChatError::Timeout(self.timeout)
        } else {
            ChatError::Network(e)
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        log::info!(
            "Chat: Sending query ({} chars, {} prior turns) to {}",
            request.query.len(),
            request.chat_history.len(),
            self.url
        );

        let mut builder = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        log::debug!("Chat: Response status {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                ChatError::InvalidResponse(e.to_string())
            } else {
                self.map_send_error(e)
            }
        })?;

        Ok(ChatReply::from_json(&body))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
