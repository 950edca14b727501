//! Voice input: recorder plus transcription behind one handle.
//!
//! Owns the in-flight transcription's cancellation token so `cancel()` both
//! releases the microphone and abandons the upload.

use crate::error::{ConfigError, ErrorKind};
use crate::recorder::{RecorderError, RecorderState, SharedRecorder};
use crate::settings::SpeechToTextSettings;
use crate::stt::{SttError, TranscriptionClient};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Transcription(#[from] SttError),
}

impl VoiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::Recorder(e) => e.kind(),
            VoiceError::Transcription(e) => e.kind(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

pub struct VoiceInput {
    recorder: SharedRecorder,
    transcriber: Result<TranscriptionClient, ConfigError>,
    stt: SpeechToTextSettings,
    /// Id and token of the transcription currently uploading
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
    next_request: AtomicU64,
}

impl VoiceInput {
    pub fn new(
        recorder: SharedRecorder,
        transcriber: Result<TranscriptionClient, ConfigError>,
        stt: SpeechToTextSettings,
    ) -> Self {
        Self {
            recorder,
            transcriber,
            stt,
            in_flight: Mutex::new(None),
            next_request: AtomicU64::new(0),
        }
    }

    pub fn from_settings(recorder: SharedRecorder, stt: &SpeechToTextSettings) -> Self {
        let transcriber = TranscriptionClient::from_settings(stt);
        if let Err(e) = &transcriber {
            log::warn!("Voice: Transcription unavailable: {}", e);
        }
        Self::new(recorder, transcriber, stt.clone())
    }

    pub fn state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<RecorderState>> {
        self.recorder.subscribe()
    }

    pub fn levels(&self) -> Option<Vec<f32>> {
        self.recorder.levels()
    }

    pub fn segment_duration_secs(&self) -> u32 {
        self.recorder.segment_duration_secs()
    }

    pub fn total_duration_secs(&self) -> u32 {
        self.recorder.total_duration_secs()
    }

    pub fn is_transcribing(&self) -> bool {
        self.in_flight
            .lock()
            .map(|t| t.is_some())
            .unwrap_or(false)
    }

    pub fn start(&self) -> Result<(), VoiceError> {
        Ok(self.recorder.start(&self.stt)?)
    }

    pub fn stop(&self) -> Result<(), VoiceError> {
        Ok(self.recorder.stop()?)
    }

    pub fn continue_recording(&self) -> Result<(), VoiceError> {
        Ok(self.recorder.continue_recording()?)
    }

    /// Discard the recording and abandon any in-flight transcription.
    pub fn cancel(&self) {
        self.recorder.cancel();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some((_, token)) = in_flight.take() {
                token.cancel();
                log::info!("Voice: Abandoned in-flight transcription");
            }
        }
    }

    /// Freeze the recording and transcribe it.
    ///
    /// The recorder is Idle once this returns, whatever the outcome.
    pub async fn accept(&self) -> Result<String, VoiceError> {
        let payload = self.recorder.accept()?;
        let client = self.transcriber.as_ref().map_err(|e| SttError::Config(e.clone()))?;

        let request = self.next_request.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some((_, previous)) = in_flight.replace((request, token.clone())) {
                previous.cancel();
            }
        }

        let result = client.transcribe(payload, &token).await;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            if matches!(in_flight.as_ref(), Some((id, _)) if *id == request) {
                *in_flight = None;
            }
        }

        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::tests::{configured_stt, FakeInput};
    use crate::stt::tests::MockProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn voice(provider: MockProvider, samples: usize) -> VoiceInput {
        let recorder = SharedRecorder::new(Box::new(FakeInput::new(samples)));
        let client = TranscriptionClient::new(Arc::new(provider), Duration::from_secs(30));
        VoiceInput::new(recorder, Ok(client), configured_stt())
    }

    #[tokio::test]
    async fn test_record_and_transcribe() {
        let voice = voice(MockProvider::ok(" Hello "), 16000);
        voice.start().unwrap();
        voice.stop().unwrap();
        assert_eq!(voice.accept().await.unwrap(), "Hello");
        assert_eq!(voice.state(), RecorderState::Idle);
        assert!(!voice.is_transcribing());
    }

    #[tokio::test]
    async fn test_short_recording_never_uploads() {
        let provider = MockProvider::ok("Hello");
        let calls = provider.calls.clone();
        let voice = voice(provider, 100);
        voice.start().unwrap();
        voice.stop().unwrap();

        let err = voice.accept().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyRecording);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(voice.state(), RecorderState::Idle);
    }

    #[tokio::test]
    async fn test_missing_transcriber_is_config_error() {
        let recorder = SharedRecorder::new(Box::new(FakeInput::new(16000)));
        let voice = VoiceInput::new(
            recorder,
            Err(ConfigError::missing("speech-to-text API key")),
            configured_stt(),
        );
        voice.start().unwrap();
        voice.stop().unwrap();
        let err = voice.accept().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_transcription() {
        let voice = Arc::new(voice(
            MockProvider::ok("late").with_delay(Duration::from_secs(5)),
            16000,
        ));
        voice.start().unwrap();
        voice.stop().unwrap();

        let v = voice.clone();
        let task = tokio::spawn(async move { v.accept().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(voice.is_transcribing());
        voice.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!voice.is_transcribing());
    }
}
