//! Shared error taxonomy.
//!
//! Each module owns its own `thiserror` enum; this module gives them a common
//! classification so the front end can show one specific message per kind.

use reqwest::StatusCode;
use serde::Deserialize;

/// User-facing classification of every failure the widget can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Permission,
    DeviceNotFound,
    DeviceBusy,
    EmptyRecording,
    EmptyTranscript,
    PayloadTooLarge,
    Timeout,
    Authentication,
    RateLimited,
    Service,
    Network,
    InvalidState,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Human-readable message shown to the user for this kind of failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => {
                "Voice and chat services are not configured. Please check your settings."
            }
            ErrorKind::Permission => {
                "Microphone access denied. Please allow microphone access and try again."
            }
            ErrorKind::DeviceNotFound => {
                "No microphone found. Please connect a microphone and try again."
            }
            ErrorKind::DeviceBusy => {
                "Microphone is being used by another application. Please close other apps and try again."
            }
            ErrorKind::EmptyRecording => "Recording too short. Please record at least 0.5 seconds.",
            ErrorKind::EmptyTranscript => "No transcript received. Please try again.",
            ErrorKind::PayloadTooLarge => "Audio file too large. Maximum size is 25MB.",
            ErrorKind::Timeout => "Request timed out. Please try again.",
            ErrorKind::Authentication => "Invalid API key. Please check your settings.",
            ErrorKind::RateLimited => "Rate limit exceeded. Please try again in a moment.",
            ErrorKind::Service => "The service returned an error. Please try again.",
            ErrorKind::Network => "Unable to reach the service. Please check your connection.",
            ErrorKind::InvalidState => "That action is not available right now.",
            ErrorKind::Cancelled => "Cancelled.",
            ErrorKind::Internal => "Something went wrong. Please try again.",
        }
    }
}

/// A blank or missing required setting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Configuration error: {setting} is not configured")]
pub struct ConfigError {
    pub setting: &'static str,
}

impl ConfigError {
    pub fn missing(setting: &'static str) -> Self {
        Self { setting }
    }
}

/// Classification of a non-2xx response from an OpenAI-compatible API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    Authentication(String),
    RateLimited(String),
    Service { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_code")]
    code: Option<String>,
}

// Azure returns numeric codes ("401") as strings, OpenAI returns snake_case
// identifiers; some proxies return bare numbers.
fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl ApiFailure {
    /// Read a failed response's body and classify it.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::classify(status, &body)
    }

    /// Classify an upstream failure from its status code and body text.
    pub fn classify(status: StatusCode, body: &str) -> Self {
        let detail = serde_json::from_str::<ErrorResponse>(body).ok().map(|r| r.error);
        let code = detail.as_ref().and_then(|d| d.code.clone()).unwrap_or_default();
        let message = detail
            .and_then(|d| d.message)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                let body = body.trim();
                if body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("Unknown error")
                        .to_string()
                } else {
                    body.to_string()
                }
            });

        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || code == "invalid_api_key"
            || code == "401"
        {
            ApiFailure::Authentication(message)
        } else if status == StatusCode::TOO_MANY_REQUESTS || code == "rate_limit_exceeded" || code == "429" {
            ApiFailure::RateLimited(message)
        } else {
            ApiFailure::Service {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_authentication() {
        let failure = ApiFailure::classify(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#,
        );
        assert_eq!(
            failure,
            ApiFailure::Authentication("Incorrect API key provided".to_string())
        );
    }

    #[test]
    fn test_invalid_key_code_wins_over_status() {
        let failure = ApiFailure::classify(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"invalid_api_key"}}"#,
        );
        assert!(matches!(failure, ApiFailure::Authentication(_)));
    }

    #[test]
    fn test_rate_limited() {
        let failure = ApiFailure::classify(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(
            failure,
            ApiFailure::RateLimited("Too Many Requests".to_string())
        );
    }

    #[test]
    fn test_service_error_keeps_upstream_message() {
        let failure = ApiFailure::classify(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"message":"model overloaded","code":500}}"#,
        );
        assert_eq!(
            failure,
            ApiFailure::Service {
                status: 500,
                message: "model overloaded".to_string()
            }
        );
    }

    #[test]
    fn test_service_error_falls_back_to_body() {
        let failure = ApiFailure::classify(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            failure,
            ApiFailure::Service {
                status: 502,
                message: "upstream down".to_string()
            }
        );
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let kinds = [
            ErrorKind::Configuration,
            ErrorKind::Permission,
            ErrorKind::DeviceNotFound,
            ErrorKind::DeviceBusy,
            ErrorKind::EmptyRecording,
            ErrorKind::EmptyTranscript,
            ErrorKind::Timeout,
            ErrorKind::Authentication,
            ErrorKind::RateLimited,
            ErrorKind::Service,
            ErrorKind::Network,
        ];
        let messages: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.user_message()).collect();
        assert_eq!(messages.len(), kinds.len());
    }
}
