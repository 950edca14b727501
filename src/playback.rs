//! Spoken replies: synthesis cache and single-track playback.
//!
//! [`PlaybackCache`] keeps at most one synthesized resource per message id and
//! never runs two syntheses for the same id at once. Concurrent callers share
//! the outcome of the one in flight, failures included; only a later call
//! retries a failed synthesis. Playback goes through an
//! [`AudioOutput`]; only one id plays at a time across the widget.
//!
//! [`RodioOutput`] owns the rodio output stream on a dedicated thread and is
//! driven by commands, since the stream is not `Send` on every platform.

use crate::error::{ConfigError, ErrorKind};
use crate::tts::{TtsError, TtsProvider};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Errors from synthesis or playback
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Speech synthesis failed: {0}")]
    Tts(#[source] Arc<TtsError>),

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Playback was reset")]
    Cancelled,

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<TtsError> for PlaybackError {
    fn from(e: TtsError) -> Self {
        PlaybackError::Tts(Arc::new(e))
    }
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::Config(_) => ErrorKind::Configuration,
            PlaybackError::Tts(e) => e.kind(),
            PlaybackError::Output(_) => ErrorKind::DeviceNotFound,
            PlaybackError::Cancelled => ErrorKind::Cancelled,
            PlaybackError::Lock(_) => ErrorKind::Internal,
        }
    }
}

/// A synthesized, playable rendition of one message.
#[derive(Debug, Clone)]
pub struct AudioResource {
    pub message_id: String,
    /// Encoded audio as returned by the provider
    pub audio: Arc<[u8]>,
}

/// What `play` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Started,
    Paused,
}

/// A device that can play encoded tracks keyed by message id.
pub trait AudioOutput: Send + Sync {
    /// Play `audio` for `id` from the start.
    fn start(&self, id: &str, audio: Arc<[u8]>) -> Result<(), PlaybackError>;

    /// Pause `id`, keeping its position.
    fn pause(&self, id: &str);

    /// Stop `id` and rewind it.
    fn stop(&self, id: &str);

    /// Whether `id` has played to the end (or was never started).
    fn is_finished(&self, id: &str) -> bool;

    /// Stop everything and release every loaded track.
    fn release_all(&self);
}

/// Outcome of one synthesis attempt, shared by everyone awaiting it.
type SynthesisSlot = OnceCell<Result<AudioResource, PlaybackError>>;

struct CacheState {
    /// Bumped by `reset()`; results from older generations are discarded
    generation: u64,
    cancel: CancellationToken,
    entries: HashMap<String, Arc<SynthesisSlot>>,
    playing: Option<String>,
}

struct CacheInner {
    provider: Result<Arc<dyn TtsProvider>, ConfigError>,
    output: Arc<dyn AudioOutput>,
    state: Mutex<CacheState>,
}

/// Per-message synthesis cache with single-track playback.
#[derive(Clone)]
pub struct PlaybackCache {
    inner: Arc<CacheInner>,
}

impl PlaybackCache {
    /// `provider` is the configuration outcome; an error is reported by every `ensure`.
    pub fn new(
        provider: Result<Arc<dyn TtsProvider>, ConfigError>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                provider,
                output,
                state: Mutex::new(CacheState {
                    generation: 0,
                    cancel: CancellationToken::new(),
                    entries: HashMap::new(),
                    playing: None,
                }),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheState>, PlaybackError> {
        self.inner
            .state
            .lock()
            .map_err(|e| PlaybackError::Lock(e.to_string()))
    }

    /// Return the resource for `message_id`, synthesizing it if needed.
    ///
    /// Concurrent calls for the same id share one synthesis request.
    pub async fn ensure(
        &self,
        message_id: &str,
        text: &str,
    ) -> Result<AudioResource, PlaybackError> {
        let provider = self.inner.provider.clone()?;

        let (slot, generation, cancel) = {
            let mut state = self.lock()?;
            let slot = state
                .entries
                .entry(message_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            (slot, state.generation, state.cancel.clone())
        };

        let outcome = slot
            .get_or_init(|| async {
                log::info!("Playback: Synthesizing audio for {}", message_id);
                let audio = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
                    audio = provider.synthesize(text) => audio?,
                };
                Ok::<_, PlaybackError>(AudioResource {
                    message_id: message_id.to_string(),
                    audio: Arc::from(audio),
                })
            })
            .await
            .clone();

        let resource = match outcome {
            Ok(resource) => resource,
            Err(e) => {
                // Drop the failed slot so the next call starts a fresh attempt
                let mut state = self.lock()?;
                if state
                    .entries
                    .get(message_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot))
                {
                    state.entries.remove(message_id);
                    if !matches!(e, PlaybackError::Cancelled) {
                        log::error!("Playback: Synthesis for {} failed: {}", message_id, e);
                    }
                }
                return Err(e);
            }
        };

        // A reset while synthesizing means this result belongs to a dead conversation
        if self.lock()?.generation != generation {
            log::debug!("Playback: Discarding synthesis for {} after reset", message_id);
            return Err(PlaybackError::Cancelled);
        }

        Ok(resource)
    }

    /// Play/pause toggle for `message_id`.
    ///
    /// Any other playing track is stopped and rewound before this one starts.
    pub async fn play(
        &self,
        message_id: &str,
        text: &str,
    ) -> Result<PlaybackOutcome, PlaybackError> {
        let generation = {
            let mut state = self.lock()?;
            self.clear_finished(&mut state);
            if state.playing.as_deref() == Some(message_id) {
                self.inner.output.pause(message_id);
                state.playing = None;
                log::info!("Playback: Paused {}", message_id);
                return Ok(PlaybackOutcome::Paused);
            }
            state.generation
        };

        let resource = self.ensure(message_id, text).await?;

        let previous = {
            let mut state = self.lock()?;
            if state.generation != generation {
                return Err(PlaybackError::Cancelled);
            }
            state.playing.take()
        };
        if let Some(previous) = previous {
            self.inner.output.stop(&previous);
            log::debug!("Playback: Stopped {}", previous);
        }

        // Starting decodes the track, so the cache stays unlocked meanwhile
        self.inner.output.start(message_id, resource.audio)?;

        let mut state = self.lock()?;
        if state.generation != generation {
            drop(state);
            self.inner.output.stop(message_id);
            return Err(PlaybackError::Cancelled);
        }
        if let Some(other) = state.playing.replace(message_id.to_string()) {
            if other != message_id {
                self.inner.output.stop(&other);
            }
        }
        log::info!("Playback: Playing {}", message_id);
        Ok(PlaybackOutcome::Started)
    }

    fn clear_finished(&self, state: &mut CacheState) {
        if let Some(id) = &state.playing {
            if self.inner.output.is_finished(id) {
                state.playing = None;
            }
        }
    }

    /// The id currently playing, if any. Cleared once the track ends.
    pub fn now_playing(&self) -> Option<String> {
        let mut state = self.lock().ok()?;
        self.clear_finished(&mut state);
        state.playing.clone()
    }

    /// Whether synthesis for `message_id` is in flight.
    pub fn is_generating(&self, message_id: &str) -> bool {
        self.lock()
            .map(|state| {
                state
                    .entries
                    .get(message_id)
                    .is_some_and(|slot| !slot.initialized())
            })
            .unwrap_or(false)
    }

    pub fn is_cached(&self, message_id: &str) -> bool {
        self.lock()
            .map(|state| {
                state
                    .entries
                    .get(message_id)
                    .and_then(|slot| slot.get())
                    .is_some_and(|outcome| outcome.is_ok())
            })
            .unwrap_or(false)
    }

    /// Stop and rewind whatever is playing. Cached audio is kept.
    pub fn stop(&self) {
        if let Ok(mut state) = self.lock() {
            if let Some(id) = state.playing.take() {
                self.inner.output.stop(&id);
                log::info!("Playback: Stopped {}", id);
            }
        }
    }

    /// Stop everything, drop every cached resource and abandon in-flight synthesis.
    pub fn reset(&self) {
        match self.inner.state.lock() {
            Ok(mut state) => {
                state.generation += 1;
                state.cancel.cancel();
                state.cancel = CancellationToken::new();
                state.entries.clear();
                state.playing = None;
            }
            Err(e) => log::error!("Playback: Lock error during reset: {}", e),
        }
        self.inner.output.release_all();
        log::info!("Playback: Reset");
    }
}

// ============================================================================
// rodio output thread
// ============================================================================

enum OutputCommand {
    Start {
        id: String,
        audio: Arc<[u8]>,
        reply: mpsc::Sender<Result<(), PlaybackError>>,
    },
    Pause {
        id: String,
    },
    Stop {
        id: String,
    },
    IsFinished {
        id: String,
        reply: mpsc::Sender<bool>,
    },
    ReleaseAll {
        reply: mpsc::Sender<()>,
    },
}

/// rodio-backed output running on its own thread.
///
/// The output stream is opened on first use and kept until the handle drops.
pub struct RodioOutput {
    command_tx: Mutex<mpsc::Sender<OutputCommand>>,
}

impl RodioOutput {
    pub fn new() -> Result<Self, PlaybackError> {
        let (command_tx, command_rx) = mpsc::channel();
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_output_thread(command_rx))
            .map_err(|e| PlaybackError::Output(format!("Failed to spawn output thread: {}", e)))?;
        Ok(Self {
            command_tx: Mutex::new(command_tx),
        })
    }

    fn send(&self, command: OutputCommand) -> bool {
        match self.command_tx.lock() {
            Ok(tx) => tx.send(command).is_ok(),
            Err(_) => false,
        }
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, id: &str, audio: Arc<[u8]>) -> Result<(), PlaybackError> {
        let (reply, result) = mpsc::channel();
        if !self.send(OutputCommand::Start {
            id: id.to_string(),
            audio,
            reply,
        }) {
            return Err(PlaybackError::Output("Output thread exited".to_string()));
        }
        result
            .recv()
            .map_err(|_| PlaybackError::Output("Output thread exited".to_string()))?
    }

    fn pause(&self, id: &str) {
        self.send(OutputCommand::Pause { id: id.to_string() });
    }

    fn stop(&self, id: &str) {
        self.send(OutputCommand::Stop { id: id.to_string() });
    }

    fn is_finished(&self, id: &str) -> bool {
        let (reply, result) = mpsc::channel();
        if !self.send(OutputCommand::IsFinished {
            id: id.to_string(),
            reply,
        }) {
            return true;
        }
        result.recv().unwrap_or(true)
    }

    fn release_all(&self) {
        let (reply, done) = mpsc::channel();
        if self.send(OutputCommand::ReleaseAll { reply }) {
            // Wait so nothing is still playing when reset returns
            let _ = done.recv();
        }
    }
}

fn run_output_thread(command_rx: mpsc::Receiver<OutputCommand>) {
    let mut stream: Option<OutputStream> = None;
    let mut sinks: HashMap<String, Sink> = HashMap::new();

    // Exits when the RodioOutput handle is dropped
    while let Ok(command) = command_rx.recv() {
        match command {
            OutputCommand::Start { id, audio, reply } => {
                let result = start_track(&mut stream, &mut sinks, &id, audio);
                if let Err(e) = &result {
                    log::warn!("Failed to play audio: {}", e);
                }
                let _ = reply.send(result);
            }
            OutputCommand::Pause { id } => {
                if let Some(sink) = sinks.get(&id) {
                    sink.pause();
                }
            }
            OutputCommand::Stop { id } => {
                // Dropping the sink rewinds; the next start decodes from the beginning
                if let Some(sink) = sinks.remove(&id) {
                    sink.stop();
                }
            }
            OutputCommand::IsFinished { id, reply } => {
                let finished = sinks.get(&id).map(|s| s.empty()).unwrap_or(true);
                let _ = reply.send(finished);
            }
            OutputCommand::ReleaseAll { reply } => {
                for (_, sink) in sinks.drain() {
                    sink.stop();
                }
                let _ = reply.send(());
            }
        }
    }

    for (_, sink) in sinks.drain() {
        sink.stop();
    }
    log::debug!("Audio output thread exiting");
}

fn start_track(
    stream: &mut Option<OutputStream>,
    sinks: &mut HashMap<String, Sink>,
    id: &str,
    audio: Arc<[u8]>,
) -> Result<(), PlaybackError> {
    if stream.is_none() {
        let mut opened = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        opened.log_on_drop(false);
        *stream = Some(opened);
    }
    let mixer = match stream.as_ref() {
        Some(s) => s.mixer(),
        None => return Err(PlaybackError::Output("No output stream".to_string())),
    };

    let decoded = Decoder::new(Cursor::new(audio))
        .map_err(|e| PlaybackError::Output(format!("Failed to decode audio: {}", e)))?;

    if let Some(previous) = sinks.remove(id) {
        previous.stop();
    }
    let sink = Sink::connect_new(mixer);
    sink.append(decoded);
    sink.play();
    sinks.insert(id.to_string(), sink);
    Ok(())
}
