//! Widget controller: the single owner of one widget session.
//!
//! Turns user intents into operations on the conversation, the chat endpoint,
//! the playback cache and voice input. Everything the presentation layer shows
//! comes from [`Widget::view`].

use crate::audio_capture::AudioInput;
use crate::chat::{ChatBackend, ChatError, ChatRequest, HttpChatBackend};
use crate::error::{ConfigError, ErrorKind};
use crate::history::{ChatMessage, ConversationStore, HistoryError};
use crate::playback::{AudioOutput, PlaybackCache, PlaybackError, PlaybackOutcome};
use crate::recorder::{RecorderState, SharedRecorder};
use crate::settings::{DisplayMode, WidgetSettings, DISPLAY_MODE_STORAGE_KEY};
use crate::storage::LocalStorage;
use crate::tts;
use crate::voice::{VoiceError, VoiceInput};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("No message with id '{0}'")]
    UnknownMessage(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl WidgetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WidgetError::Voice(e) => e.kind(),
            WidgetError::Playback(e) => e.kind(),
            WidgetError::History(e) => e.kind(),
            WidgetError::UnknownMessage(_) => ErrorKind::InvalidState,
            WidgetError::Lock(_) => ErrorKind::Internal,
        }
    }
}

/// Result of `submit()`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Input was blank; nothing happened
    Ignored,
    Replied(ChatMessage),
    /// The request failed and this apology was appended instead
    Apologized(ChatMessage),
    /// The request was abandoned by close/new chat; its result was discarded
    Abandoned,
}

/// Snapshot of everything the presentation layer renders.
#[derive(Debug, Clone)]
pub struct WidgetView {
    pub is_open: bool,
    pub is_minimized: bool,
    pub display_mode: DisplayMode,
    pub input: String,
    pub loading: bool,
    pub messages: Vec<ChatMessage>,
    pub now_playing: Option<String>,
    /// Messages whose audio is being synthesized
    pub generating: Vec<String>,
    pub recorder_state: RecorderState,
    pub session_id: String,
}

impl WidgetView {
    pub fn has_started_chat(&self) -> bool {
        !self.messages.is_empty()
    }
}

struct UiState {
    is_open: bool,
    is_minimized: bool,
    display_mode: DisplayMode,
    input: String,
    /// Number of chat requests in flight
    pending: usize,
}

/// Tracks the chat request lifetime. Bumping `epoch` abandons every
/// request started before it.
struct ChatSession {
    id: String,
    epoch: u64,
    cancel: CancellationToken,
}

impl ChatSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            epoch: 0,
            cancel: CancellationToken::new(),
        }
    }

    fn abandon(&mut self) {
        self.epoch += 1;
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }
}

pub struct Widget {
    storage: LocalStorage,
    conversation: ConversationStore,
    chat: Result<Arc<dyn ChatBackend>, ConfigError>,
    playback: PlaybackCache,
    voice: VoiceInput,
    ui: Mutex<UiState>,
    session: Mutex<ChatSession>,
}

impl Widget {
    pub fn new(
        storage: LocalStorage,
        default_mode: DisplayMode,
        chat: Result<Arc<dyn ChatBackend>, ConfigError>,
        playback: PlaybackCache,
        voice: VoiceInput,
    ) -> Self {
        let display_mode = load_display_mode(&storage).unwrap_or(default_mode);
        let conversation = ConversationStore::load(storage.clone());
        log::info!("Widget: Display mode {}", display_mode.as_str());

        Self {
            storage,
            conversation,
            chat,
            playback,
            voice,
            ui: Mutex::new(UiState {
                is_open: false,
                is_minimized: false,
                display_mode,
                input: String::new(),
                pending: 0,
            }),
            session: Mutex::new(ChatSession::new()),
        }
    }

    /// Wire the widget to the real HTTP services.
    ///
    /// Missing settings do not fail construction; each affected operation
    /// reports its own configuration error when used.
    pub fn from_settings(
        settings: &WidgetSettings,
        input: Box<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let storage = LocalStorage::new(settings.data_dir());

        let chat = HttpChatBackend::from_settings(settings)
            .map(|backend| Arc::new(backend) as Arc<dyn ChatBackend>);
        if let Err(e) = &chat {
            log::warn!("Widget: Chat unavailable: {}", e);
        }

        let synthesis = tts::provider_from_settings(&settings.tts);
        if let Err(e) = &synthesis {
            log::warn!("Widget: Spoken replies unavailable: {}", e);
        }

        let voice = VoiceInput::from_settings(SharedRecorder::new(input), &settings.stt);
        Self::new(
            storage,
            settings.display_mode,
            chat,
            PlaybackCache::new(synthesis, output),
            voice,
        )
    }

    fn ui(&self) -> Result<MutexGuard<'_, UiState>, WidgetError> {
        self.ui.lock().map_err(|e| WidgetError::Lock(e.to_string()))
    }

    fn session(&self) -> Result<MutexGuard<'_, ChatSession>, WidgetError> {
        self.session
            .lock()
            .map_err(|e| WidgetError::Lock(e.to_string()))
    }

    pub fn view(&self) -> Result<WidgetView, WidgetError> {
        let (is_open, is_minimized, display_mode, input, loading) = {
            let ui = self.ui()?;
            (
                ui.is_open,
                ui.is_minimized,
                ui.display_mode,
                ui.input.clone(),
                ui.pending > 0,
            )
        };
        let messages = self.conversation.messages();
        let generating = messages
            .iter()
            .filter(|m| self.playback.is_generating(&m.id))
            .map(|m| m.id.clone())
            .collect();
        Ok(WidgetView {
            is_open,
            is_minimized,
            display_mode,
            input,
            loading,
            messages,
            now_playing: self.playback.now_playing(),
            generating,
            recorder_state: self.voice.state(),
            session_id: self.session()?.id.clone(),
        })
    }

    pub fn voice(&self) -> &VoiceInput {
        &self.voice
    }

    pub fn playback(&self) -> &PlaybackCache {
        &self.playback
    }

    pub fn toggle_open(&self) -> Result<bool, WidgetError> {
        let mut ui = self.ui()?;
        ui.is_open = !ui.is_open;
        ui.is_minimized = false;
        log::info!("Widget: {}", if ui.is_open { "Opened" } else { "Closed" });
        Ok(ui.is_open)
    }

    /// Close the widget. The conversation is kept; everything in flight is dropped.
    pub fn close(&self) -> Result<(), WidgetError> {
        self.playback.stop();
        self.voice.cancel();
        self.session()?.abandon();
        let mut ui = self.ui()?;
        ui.is_open = false;
        ui.is_minimized = false;
        ui.input.clear();
        ui.pending = 0;
        log::info!("Widget: Closed");
        Ok(())
    }

    /// Minimizing from full screen drops back to the popup first.
    pub fn toggle_minimize(&self) -> Result<bool, WidgetError> {
        let mut ui = self.ui()?;
        if ui.display_mode == DisplayMode::FullScreen && !ui.is_minimized {
            ui.display_mode = DisplayMode::Popup;
            self.persist_display_mode(DisplayMode::Popup);
            ui.is_minimized = true;
        } else {
            ui.is_minimized = !ui.is_minimized;
        }
        Ok(ui.is_minimized)
    }

    pub fn toggle_fullscreen(&self) -> Result<DisplayMode, WidgetError> {
        let mut ui = self.ui()?;
        ui.display_mode = ui.display_mode.toggled();
        ui.is_minimized = false;
        self.persist_display_mode(ui.display_mode);
        log::info!("Widget: Display mode {}", ui.display_mode.as_str());
        Ok(ui.display_mode)
    }

    fn persist_display_mode(&self, mode: DisplayMode) {
        let result = serde_json::to_string(mode.as_str())
            .map_err(|e| e.to_string())
            .and_then(|value| {
                self.storage
                    .set_item(DISPLAY_MODE_STORAGE_KEY, &value)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            log::warn!("Widget: Failed to save display mode: {}", e);
        }
    }

    /// Start over: silence and drop all audio, clear the conversation and
    /// abandon any chat request.
    pub fn new_chat(&self) -> Result<(), WidgetError> {
        self.playback.reset();
        {
            let mut session = self.session()?;
            session.abandon();
            session.id = Uuid::new_v4().to_string();
            log::info!("Widget: New chat session {}", session.id);
        }
        {
            let mut ui = self.ui()?;
            ui.input.clear();
            ui.pending = 0;
        }
        self.conversation.clear()?;
        Ok(())
    }

    pub fn set_input(&self, text: impl Into<String>) -> Result<(), WidgetError> {
        self.ui()?.input = text.into();
        Ok(())
    }

    /// Put a transcript into the input buffer, replacing what was typed.
    pub fn insert_transcript(&self, transcript: &str) -> Result<(), WidgetError> {
        self.set_input(transcript)
    }

    /// Send the input buffer to the chat endpoint.
    ///
    /// Any failure appends exactly one apology message; the error itself is only logged.
    pub async fn submit(&self) -> Result<SubmitOutcome, WidgetError> {
        let query = {
            let mut ui = self.ui()?;
            if ui.input.trim().is_empty() {
                return Ok(SubmitOutcome::Ignored);
            }
            ui.pending += 1;
            std::mem::take(&mut ui.input)
        };

        let (epoch, cancel) = {
            let session = self.session()?;
            (session.epoch, session.cancel.clone())
        };

        let request = ChatRequest {
            query: query.clone(),
            chat_history: self.conversation.chat_history(),
        };
        if let Err(e) = self.conversation.append(ChatMessage::user(query.clone())) {
            log::warn!("Widget: Failed to save message: {}", e);
        }

        let result = match &self.chat {
            Ok(backend) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ChatError::Cancelled),
                    reply = backend.send(&request) => reply,
                }
            }
            Err(e) => Err(ChatError::Config(e.clone())),
        };

        // Anything that bumped the epoch made this response stale
        if self.session()?.epoch != epoch {
            log::info!("Widget: Discarding response to an abandoned request");
            return Ok(SubmitOutcome::Abandoned);
        }

        let message = match result {
            Ok(reply) => {
                let mut message = ChatMessage::bot(reply.text, Some(reply.agent));
                if let Some(timestamp) = reply.timestamp {
                    message = message.with_timestamp(timestamp);
                }
                log::info!("Widget: Reply received ({} chars)", message.text.len());
                Ok(message)
            }
            Err(e) => {
                log::error!("Widget: Chat request failed: {}", e);
                Err(ChatMessage::bot(e.apology(&query), None))
            }
        };

        let appended = match &message {
            Ok(m) | Err(m) => m.clone(),
        };
        if let Err(e) = self.conversation.append(appended) {
            log::warn!("Widget: Failed to save message: {}", e);
        }

        let mut ui = self.ui()?;
        ui.pending = ui.pending.saturating_sub(1);
        Ok(match message {
            Ok(m) => SubmitOutcome::Replied(m),
            Err(m) => SubmitOutcome::Apologized(m),
        })
    }

    /// Play or pause the spoken version of a message.
    pub async fn play_message(&self, message_id: &str) -> Result<PlaybackOutcome, WidgetError> {
        let message = self
            .conversation
            .find(message_id)
            .ok_or_else(|| WidgetError::UnknownMessage(message_id.to_string()))?;
        Ok(self.playback.play(&message.id, &message.text).await?)
    }

    pub fn start_voice(&self) -> Result<(), WidgetError> {
        Ok(self.voice.start()?)
    }

    pub fn stop_voice(&self) -> Result<(), WidgetError> {
        Ok(self.voice.stop()?)
    }

    pub fn continue_voice(&self) -> Result<(), WidgetError> {
        Ok(self.voice.continue_recording()?)
    }

    pub fn cancel_voice(&self) {
        self.voice.cancel();
    }

    /// Transcribe the recording and place the text in the input buffer.
    pub async fn accept_voice(&self) -> Result<String, WidgetError> {
        let transcript = self.voice.accept().await?;
        self.insert_transcript(&transcript)?;
        Ok(transcript)
    }

    /// Release every device and abandon everything in flight.
    pub fn shutdown(&self) {
        self.voice.cancel();
        self.playback.reset();
        if let Ok(mut session) = self.session.lock() {
            session.abandon();
        }
        log::info!("Widget: Shut down");
    }
}

fn load_display_mode(storage: &LocalStorage) -> Option<DisplayMode> {
    let raw = match storage.get_item(DISPLAY_MODE_STORAGE_KEY) {
        Ok(raw) => raw?,
        Err(e) => {
            log::warn!("Widget: Failed to read display mode: {}", e);
            return None;
        }
    };
    let value = serde_json::from_str::<String>(&raw).unwrap_or(raw);
    match value.parse() {
        Ok(mode) => Some(mode),
        Err(e) => {
            log::warn!("Widget: Ignoring saved display mode: {}", e);
            None
        }
    }
}
