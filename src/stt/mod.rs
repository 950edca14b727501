//! Speech-to-Text (STT) provider abstraction and the transcription client.
//!
//! Providers only know how to upload audio. [`TranscriptionClient`] wraps one
//! with the client-side timeout, cancellation and transcript validation.

mod openai;

pub use openai::{OpenAiSttProvider, SttAuth};

use crate::audio_capture::CaptureFormat;
use crate::error::{ApiFailure, ConfigError, ErrorKind};
use crate::recorder::RecordingPayload;
use crate::settings::SpeechToTextSettings;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during STT operations
#[derive(Debug, thiserror::Error)]
pub enum SttError {
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

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("No transcript received")]
    EmptyTranscript,

    #[error("Timeout: transcription took longer than {0:?}")]
    Timeout(Duration),

    #[error("Transcription cancelled")]
    Cancelled,
}

impl From<ApiFailure> for SttError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Authentication(m) => SttError::Authentication(m),
            ApiFailure::RateLimited(m) => SttError::RateLimited(m),
            ApiFailure::Service { status, message } => SttError::Service { status, message },
        }
    }
}

impl SttError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SttError::Config(_) => ErrorKind::Configuration,
            SttError::Authentication(_) => ErrorKind::Authentication,
            SttError::RateLimited(_) => ErrorKind::RateLimited,
            SttError::Service { .. } | SttError::InvalidResponse(_) => ErrorKind::Service,
            SttError::Network(_) => ErrorKind::Network,
            SttError::Audio(_) => ErrorKind::Internal,
            SttError::EmptyTranscript => ErrorKind::EmptyTranscript,
            SttError::Timeout(_) => ErrorKind::Timeout,
            SttError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Trait for Speech-to-Text providers
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe audio data to text
    ///
    /// # Arguments
    /// * `audio` - WAV bytes
    /// * `format` - Capture format of the audio
    ///
    /// # Returns
    /// The raw transcript text, possibly blank
    async fn transcribe(&self, audio: &[u8], format: &CaptureFormat) -> Result<String, SttError>;

    /// Get the name of this provider
    fn name(&self) -> &'static str;
}

/// Build the provider described by the settings.
pub fn provider_from_settings(
    settings: &SpeechToTextSettings,
) -> Result<Arc<dyn SttProvider>, ConfigError> {
    Ok(Arc::new(OpenAiSttProvider::from_settings(settings)?))
}

/// Transcribes recordings with a timeout and cooperative cancellation.
///
/// No retry is attempted; failures go straight back to the caller.
#[derive(Clone)]
pub struct TranscriptionClient {
    provider: Arc<dyn SttProvider>,
    timeout: Duration,
}

impl TranscriptionClient {
    pub fn new(provider: Arc<dyn SttProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn from_settings(settings: &SpeechToTextSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(provider_from_settings(settings)?, settings.timeout()))
    }

    /// Transcribe a frozen recording.
    ///
    /// The upload is dropped (aborting the request) when `cancel` fires or the
    /// timeout elapses.
    pub async fn transcribe(
        &self,
        payload: RecordingPayload,
        cancel: &CancellationToken,
    ) -> Result<String, SttError> {
        log::info!(
            "STT: Transcribing {} bytes ({:.2}s) via {}",
            payload.wav_bytes.len(),
            payload.duration_secs,
            self.provider.name()
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("STT: Transcription cancelled");
                return Err(SttError::Cancelled);
            }
            _ = tokio::time::sleep(self.timeout) => {
                log::warn!("STT: Transcription timed out after {:?}", self.timeout);
                return Err(SttError::Timeout(self.timeout));
            }
            result = self.provider.transcribe(&payload.wav_bytes, &payload.format) => result,
        };

        let text = result.map_err(|e| {
            log::error!("STT: Transcription failed: {}", e);
            e
        })?;

        let text = text.trim();
        if text.is_empty() {
            log::warn!("STT: Empty transcript");
            return Err(SttError::EmptyTranscript);
        }

        log::info!("STT: Transcript received ({} chars)", text.len());
        Ok(text.to_string())
    }
}
