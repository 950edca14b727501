//! OpenAI TTS provider (`/audio/speech`).

use super::{TtsError, TtsProvider};
use crate::error::{ApiFailure, ConfigError};
use crate::settings::TextToSpeechSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

/// OpenAI provider for text-to-speech
pub struct OpenAiTtsProvider {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
    timeout: Duration,
}

impl OpenAiTtsProvider {
    pub fn from_settings(settings: &TextToSpeechSettings) -> Result<Self, ConfigError> {
        Self::with_client(Client::new(), settings)
    }

    /// Create with custom client and settings
    pub fn with_client(client: Client, settings: &TextToSpeechSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            url: settings.speech_url(),
            api_key: settings.require_api_key()?.to_string(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            timeout: settings.timeout(),
        })
    }
}

#[async_trait]
impl TtsProvider for OpenAiTtsProvider {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
        };

        log::debug!("TTS: Requesting speech for {} chars", text.len());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout(self.timeout)
                } else {
                    TtsError::Network(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(ApiFailure::from_response(response).await.into());
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TtsError::Timeout(self.timeout)
            } else {
                TtsError::Network(e)
            }
        })?;
        if bytes.is_empty() {
            return Err(TtsError::EmptyAudio);
        }
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let settings = TextToSpeechSettings {
            api_key: Some("sk".to_string()),
            ..Default::default()
        };
        let provider = OpenAiTtsProvider::from_settings(&settings).unwrap();
        assert_eq!(provider.url, "https://api.openai.com/v1/audio/speech");
        assert_eq!(provider.model, "tts-1");
        assert_eq!(provider.voice, "alloy");
        assert_eq!(provider.timeout, Duration::from_secs(30));
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_request_body_shape() {
        let body = SpeechRequest {
            model: "tts-1",
            input: "Hi there",
            voice: "alloy",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"model": "tts-1", "input": "Hi there", "voice": "alloy"})
        );
    }
}
