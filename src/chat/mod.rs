//! Chatbot endpoint client.
//!
//! The widget sends `{ query, chat_history }` to `{base}/chat` and reads the
//! reply from whichever known field the backend fills in.

mod http;

pub use http::HttpChatBackend;

use crate::error::{ConfigError, ErrorKind};
use crate::history::{format_time, ChatTurn};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use std::time::Duration;

/// Reply text fields, in the order they are tried
pub const REPLY_TEXT_FIELDS: &[&str] = &["response", "message", "content", "answer"];

/// Agent tag fields, in the order they are tried
pub const AGENT_FIELDS: &[&str] = &["agent_used", "agent"];

pub const DEFAULT_AGENT: &str = "general";

/// Used when the backend answers without any known reply field
pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't process that request.";

/// Errors that can occur talking to the chat endpoint
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API request failed: {status} {reason}. {body}")]
    Api {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Config(_) => ErrorKind::Configuration,
            ChatError::Network(_) => ErrorKind::Network,
            ChatError::Api { status: 401 | 403, .. } => ErrorKind::Authentication,
            ChatError::Api { status: 429, .. } => ErrorKind::RateLimited,
            ChatError::Api { .. } | ChatError::InvalidResponse(_) => ErrorKind::Service,
            ChatError::Timeout(_) => ErrorKind::Timeout,
            ChatError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Text of the bot message shown in place of a reply.
    pub fn apology(&self, query: &str) -> String {
        match self {
            ChatError::Config(_) => {
                "API configuration error: Please check your settings and restart the widget."
                    .to_string()
            }
            ChatError::Network(_) => {
                "Network error: Unable to connect to the chatbot API. Please check your connection."
                    .to_string()
            }
            ChatError::Api { .. } => format!("API Error: {}", self),
            _ => format!(
                "Thank you for your message. We're experiencing technical difficulties, but your message \"{}\" has been received. Our team will get back to you soon.",
                query
            ),
        }
    }
}

/// Body posted to `{base}/chat`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub query: String,
    /// The conversation before `query`
    pub chat_history: Vec<ChatTurn>,
}

/// A parsed chat reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub agent: String,
    /// Display time derived from the reply's `timestamp`, when parseable
    pub timestamp: Option<String>,
}

fn first_text<'a>(body: &'a serde_json::Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| body.get(*field).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
}

impl ChatReply {
    pub fn from_json(body: &serde_json::Value) -> Self {
        Self {
            text: first_text(body, REPLY_TEXT_FIELDS)
                .unwrap_or(FALLBACK_REPLY)
                .to_string(),
            agent: first_text(body, AGENT_FIELDS)
                .unwrap_or(DEFAULT_AGENT)
                .to_string(),
            timestamp: body.get("timestamp").and_then(parse_timestamp),
        }
    }
}

/// Accepts RFC 3339 strings, naive ISO strings (local time) and epoch milliseconds.
fn parse_timestamp(value: &serde_json::Value) -> Option<String> {
    let local: DateTime<Local> = match value {
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                parsed.with_timezone(&Local)
            } else {
                let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()?;
                Local.from_local_datetime(&naive).earliest()?
            }
        }
        serde_json::Value::Number(n) => {
            let millis = n.as_i64()?;
            DateTime::from_timestamp_millis(millis)?.with_timezone(&Local)
        }
        _ => return None,
    };
    Some(format_time(&local))
}

/// A chatbot endpoint
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, ChatError>;

    fn name(&self) -> &'static str;
}
