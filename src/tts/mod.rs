//! Text-to-Speech (TTS) provider abstraction.
//!
//! Providers turn a bot message's text into encoded audio bytes. Caching and
//! playback live in [`crate::playback`].

mod openai;

pub use openai::OpenAiTtsProvider;

use crate::error::{ApiFailure, ConfigError, ErrorKind};
use crate::settings::TextToSpeechSettings;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for speech synthesis requests

/// Errors that can occur during TTS operations
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("API error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Synthesis returned no audio")]
    EmptyAudio,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ApiFailure> for TtsError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Authentication(m) => TtsError::Authentication(m),
            ApiFailure::RateLimited(m) => TtsError::RateLimited(m),
            ApiFailure::Service { status, message } => TtsError::Service { status, message },
        }
    }
}

impl TtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TtsError::Config(_) => ErrorKind::Configuration,
            TtsError::Authentication(_) => ErrorKind::Authentication,
            TtsError::RateLimited(_) => ErrorKind::RateLimited,
            TtsError::Service { .. } | TtsError::EmptyAudio => ErrorKind::Service,
            TtsError::Network(_) => ErrorKind::Network,
            TtsError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Trait for Text-to-Speech providers
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize `text` and return encoded audio (MP3 for OpenAI).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError>;

    /// Get the provider name
    fn name(&self) -> &'static str;
}

/// Build the provider described by the settings.
pub fn provider_from_settings(
    settings: &TextToSpeechSettings,
) -> Result<Arc<dyn TtsProvider>, ConfigError> {
    Ok(Arc::new(OpenAiTtsProvider::from_settings(settings)?))
}
