//! OpenAI-compatible STT provider.
//!
//! Supports two endpoint flavors:
//! - OpenAI: `{base}/audio/transcriptions` with a bearer token
//! - Azure OpenAI: `{endpoint}/openai/deployments/{deployment}/audio/transcriptions`
//!   with an `api-key` header

use super::{SttError, SttProvider};
use crate::audio_capture::CaptureFormat;
use crate::error::{ApiFailure, ConfigError};
use crate::settings::{SpeechFlavor, SpeechToTextSettings};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;

/// How the provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttAuth {
    Bearer,
    ApiKeyHeader,
}

/// Subset of the `verbose_json` transcription response we use.
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

/// OpenAI-compatible STT provider for speech-to-text
pub struct OpenAiSttProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    auth: SttAuth,
    model: String,
    language: String,
}

impl OpenAiSttProvider {
    const FILE_NAME: &'static str = "recording.wav";

    /// Create a provider from resolved settings.
    ///
    /// Fails with a configuration error when the endpoint or key is missing.
    pub fn from_settings(settings: &SpeechToTextSettings) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), settings)
    }

    /// Create a new provider with a custom HTTP client
    pub fn with_client(
        client: reqwest::Client,
        settings: &SpeechToTextSettings,
    ) -> Result<Self, ConfigError> {
        let url = settings.transcription_url()?;
        let api_key = settings.require_api_key()?.to_string();
        let auth = match settings.flavor {
            SpeechFlavor::OpenAi => SttAuth::Bearer,
            SpeechFlavor::Azure => SttAuth::ApiKeyHeader,
        };

        Ok(Self {
            client,
            url,
            api_key,
            auth,
            model: settings.model.clone(),
            language: settings.language.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_form(&self, audio: &[u8]) -> Result<multipart::Form, SttError> {
        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(Self::FILE_NAME)
            .mime_str("audio/wav")
            .map_err(|e| SttError::Audio(format!("Failed to create multipart: {}", e)))?;

        Ok(multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("language", self.language.clone()))
    }
}

#[async_trait]
impl SttProvider for OpenAiSttProvider {
    async fn transcribe(&self, audio: &[u8], _format: &CaptureFormat) -> Result<String, SttError> {
        let form = self.build_form(audio)?;

        let request = self.client.post(&self.url).multipart(form);
        let request = match self.auth {
            SttAuth::Bearer => request.bearer_auth(&self.api_key),
            SttAuth::ApiKeyHeader => request.header("api-key", &self.api_key),
        };

        let response = request.send().await?;

        if !response.status().is_success() {
            let failure = ApiFailure::from_response(response).await;
            return Err(failure.into());
        }

        let body = response.text().await?;
        let parsed: TranscriptionResponse = serde_json::from_str(&body)
            .map_err(|e| SttError::InvalidResponse(format!("Failed to parse transcription: {}", e)))?;

        Ok(parsed.text.unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        match self.auth {
            SttAuth::Bearer => "openai",
            SttAuth::ApiKeyHeader => "azure-openai",
        }
    }
}
