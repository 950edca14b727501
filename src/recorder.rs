//! Recorder session: microphone capture as an explicit state machine.
//!
//! ```text
//! Idle -> Recording -> (LimitReached | StoppedPendingDecision) -> accept | cancel | continue
//! ```
//!
//! - Segments are capped at [`MAX_RECORDING_SECS`]; hitting the cap stops
//!   capture but keeps the chunks so the caller can continue or accept.
//! - `accept` freezes all chunks into one WAV payload and returns to Idle.
//! - `cancel` discards everything and returns to Idle; calling it from Idle is
//!   a no-op.
//! - The microphone is never held while Idle.
//!
//! [`RecorderSession`] is synchronous and driven by `tick()`, which keeps it
//! testable. [`SharedRecorder`] owns the 1 second ticker task and is what the
//! widget talks to.

use crate::audio_capture::{
    AudioCaptureError, AudioInput, CaptureFormat, ChunkBuffer, SharedChunkBuffer,
};
use crate::error::{ConfigError, ErrorKind};
use crate::level_meter::{LevelMeter, SharedLevelMeter};
use crate::scheduler::{ScheduledTask, TickFlow};
use crate::settings::SpeechToTextSettings;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Segment duration ceiling
pub const MAX_RECORDING_SECS: u32 = 120;

/// Shortest recording worth transcribing
pub const MIN_RECORDING_SECS: f32 = 0.5;

/// Upload limit of the speech-to-text API (25 MiB)
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Errors from the recorder session
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Audio capture error: {0}")]
    AudioCapture(#[from] AudioCaptureError),

    #[error("Recording too short: {bytes} bytes (need at least {min_bytes})")]
    EmptyRecording { bytes: usize, min_bytes: usize },

    #[error("Recording too large: {bytes} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { bytes: usize, limit: usize },

    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: RecorderState,
    },

    #[error("Lock error: {0}")]
    Lock(String),
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::Config(_) => ErrorKind::Configuration,
            RecorderError::AudioCapture(e) => e.kind(),
            RecorderError::EmptyRecording { .. } => ErrorKind::EmptyRecording,
            RecorderError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            RecorderError::InvalidState { .. } => ErrorKind::InvalidState,
            RecorderError::Lock(_) => ErrorKind::Internal,
        }
    }
}

/// Recorder state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Nothing captured, microphone released
    Idle,
    /// Capturing a segment
    Recording,
    /// Segment hit the ceiling; chunks kept, capture paused
    LimitReached,
    /// User stopped; waiting for accept or cancel
    StoppedPendingDecision,
}

impl RecorderState {
    pub fn can_start(&self) -> bool {
        matches!(self, RecorderState::Idle)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, RecorderState::Recording)
    }

    pub fn can_accept(&self) -> bool {
        matches!(
            self,
            RecorderState::StoppedPendingDecision | RecorderState::LimitReached
        )
    }

    pub fn can_continue(&self) -> bool {
        matches!(self, RecorderState::LimitReached)
    }
}

/// Frozen recording handed to the transcription client.
#[derive(Debug, Clone)]
pub struct RecordingPayload {
    /// 16-bit mono WAV
    pub wav_bytes: Vec<u8>,
    pub format: CaptureFormat,
    pub duration_secs: f32,
}

/// Format seconds as `M:SS`.
pub fn format_duration(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Format a segment's progress as `M:SS / 2:00`.
pub fn format_progress(secs: u32) -> String {
    format!(
        "{} / {}",
        format_duration(secs),
        format_duration(MAX_RECORDING_SECS)
    )
}

pub struct RecorderSession {
    input: Box<dyn AudioInput>,
    buffer: SharedChunkBuffer,
    meter: SharedLevelMeter,
    state: RecorderState,
    /// Seconds in the current segment
    segment_secs: u32,
    /// Seconds from completed segments of this recording
    completed_secs: u32,
    max_segment_secs: u32,
    state_tx: watch::Sender<RecorderState>,
}

impl RecorderSession {
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        let (state_tx, _) = watch::channel(RecorderState::Idle);
        Self {
            input,
            buffer: ChunkBuffer::shared(),
            meter: LevelMeter::shared(),
            state: RecorderState::Idle,
            segment_secs: 0,
            completed_secs: 0,
            max_segment_secs: MAX_RECORDING_SECS,
            state_tx,
        }
    }

    #[cfg(test)]
    fn with_max_segment_secs(mut self, secs: u32) -> Self {
        self.max_segment_secs = secs;
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Watch state changes, including the automatic stop at the ceiling.
    pub fn subscribe(&self) -> watch::Receiver<RecorderState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: RecorderState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Whether the microphone is currently held.
    pub fn has_active_device(&self) -> bool {
        self.input.is_active()
    }

    pub fn segment_duration_secs(&self) -> u32 {
        self.segment_secs
    }

    /// Duration of the whole recording, including continued segments.
    pub fn total_duration_secs(&self) -> u32 {
        match self.state {
            RecorderState::Recording => self.completed_secs + self.segment_secs,
            _ => self.completed_secs,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.buffer.lock().map(|b| b.chunk_count()).unwrap_or(0)
    }

    /// Current waveform bars, only while recording.
    pub fn levels(&self) -> Option<Vec<f32>> {
        if self.state != RecorderState::Recording {
            return None;
        }
        self.meter.lock().ok().map(|mut m| m.levels())
    }

    /// Start a new recording.
    pub fn start(&mut self, stt: &SpeechToTextSettings) -> Result<(), RecorderError> {
        if !self.state.can_start() {
            return Err(RecorderError::InvalidState {
                action: "start recording",
                state: self.state,
            });
        }

        stt.validate()?;

        // Only LimitReached keeps chunks pending continuation, and that state
        // is not Idle, so a fresh start always begins a new sequence.
        self.buffer
            .lock()
            .map_err(|e| RecorderError::Lock(e.to_string()))?
            .clear();
        self.completed_secs = 0;

        self.begin_segment()?;
        log::info!("Recorder: Recording started");
        Ok(())
    }

    /// Resume after the ceiling, extending the same recording.
    pub fn continue_recording(&mut self) -> Result<(), RecorderError> {
        if !self.state.can_continue() {
            return Err(RecorderError::InvalidState {
                action: "continue recording",
                state: self.state,
            });
        }

        self.begin_segment()?;
        log::info!(
            "Recorder: Recording continued ({}s so far)",
            self.completed_secs
        );
        Ok(())
    }

    fn begin_segment(&mut self) -> Result<(), RecorderError> {
        if let Ok(mut meter) = self.meter.lock() {
            meter.reset();
        }

        let format = self.input.start(self.buffer.clone(), self.meter.clone())?;

        let segment = self
            .buffer
            .lock()
            .map_err(|e| RecorderError::Lock(e.to_string()))
            .and_then(|mut b| b.begin_segment(format).map_err(RecorderError::from));
        if let Err(e) = segment {
            self.input.stop();
            return Err(e);
        }

        self.segment_secs = 0;
        self.set_state(RecorderState::Recording);
        Ok(())
    }

    /// Advance the duration counter by one second.
    ///
    /// At the ceiling capture stops and the session moves to LimitReached.
    pub fn tick(&mut self) -> RecorderState {
        if self.state != RecorderState::Recording {
            return self.state;
        }

        self.segment_secs += 1;
        if self.segment_secs >= self.max_segment_secs {
            self.input.stop();
            self.completed_secs += self.segment_secs;
            self.segment_secs = 0;
            self.set_state(RecorderState::LimitReached);
            log::info!(
                "Recorder: Limit of {}s reached, capture paused",
                self.max_segment_secs
            );
        }
        self.state
    }

    /// Stop capturing and wait for a decision. Chunks are kept.
    pub fn stop(&mut self) -> Result<(), RecorderError> {
        match self.state {
            RecorderState::Recording => {
                self.input.stop();
                self.completed_secs += self.segment_secs;
                self.segment_secs = 0;
                self.set_state(RecorderState::StoppedPendingDecision);
                log::info!(
                    "Recorder: Recording stopped ({} chunks, {}s)",
                    self.chunk_count(),
                    self.completed_secs
                );
                Ok(())
            }
            // Capture is already paused at the ceiling
            RecorderState::LimitReached => Ok(()),
            state => Err(RecorderError::InvalidState {
                action: "stop recording",
                state,
            }),
        }
    }

    /// Freeze the recording into a payload and return to Idle.
    ///
    /// The session is Idle afterwards whether or not the payload is usable.
    pub fn accept(&mut self) -> Result<RecordingPayload, RecorderError> {
        if !self.state.can_accept() {
            return Err(RecorderError::InvalidState {
                action: "accept recording",
                state: self.state,
            });
        }

        let buffer = {
            let mut guard = self
                .buffer
                .lock()
                .map_err(|e| RecorderError::Lock(e.to_string()))?;
            std::mem::take(&mut *guard)
        };
        self.reset_to_idle();

        let bytes = buffer.pcm16_byte_len();
        let min_bytes = buffer
            .format()
            .map(|f| (f.pcm16_bytes_per_second() as f32 * MIN_RECORDING_SECS) as usize)
            .unwrap_or(0);
        let format = match buffer.format() {
            Some(format) if !buffer.is_empty() && bytes >= min_bytes => format,
            _ => {
                log::warn!("Recorder: Rejected short recording ({} bytes)", bytes);
                return Err(RecorderError::EmptyRecording { bytes, min_bytes });
            }
        };

        let wav_bytes = buffer.to_wav_bytes()?;
        if wav_bytes.len() > MAX_PAYLOAD_BYTES {
            log::warn!("Recorder: Rejected oversized recording ({} bytes)", wav_bytes.len());
            return Err(RecorderError::PayloadTooLarge {
                bytes: wav_bytes.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        let stats = buffer.level_stats();
        log::info!(
            "Recorder: Recording accepted, {} bytes (duration {:.2}s, rms {:.6}, peak {:.6})",
            wav_bytes.len(),
            stats.duration_secs,
            stats.rms,
            stats.peak
        );

        Ok(RecordingPayload {
            wav_bytes,
            format,
            duration_secs: stats.duration_secs,
        })
    }

    /// Discard everything and return to Idle. No-op from Idle.
    pub fn cancel(&mut self) {
        if self.state == RecorderState::Idle {
            log::debug!("Recorder: Cancel requested but nothing to cancel");
            return;
        }
        self.input.stop();
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
        self.reset_to_idle();
        log::info!("Recorder: Cancelled and reset to idle");
    }

    fn reset_to_idle(&mut self) {
        self.input.stop();
        self.segment_secs = 0;
        self.completed_secs = 0;
        if let Ok(mut meter) = self.meter.lock() {
            meter.reset();
        }
        self.set_state(RecorderState::Idle);
    }
}

impl Drop for RecorderSession {
    fn drop(&mut self) {
        self.input.stop();
    }
}

struct RecorderInner {
    session: Mutex<RecorderSession>,
    ticker: Mutex<Option<ScheduledTask>>,
}

/// Thread-safe recorder owning its duration ticker.
///
/// Operations that start capture must be called from within a tokio runtime.
#[derive(Clone)]
pub struct SharedRecorder {
    inner: Arc<RecorderInner>,
}

impl SharedRecorder {
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        Self::from_session(RecorderSession::new(input))
    }

    fn from_session(session: RecorderSession) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                session: Mutex::new(session),
                ticker: Mutex::new(None),
            }),
        }
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut RecorderSession) -> Result<T, RecorderError>,
    ) -> Result<T, RecorderError> {
        let mut session = self
            .inner
            .session
            .lock()
            .map_err(|e| RecorderError::Lock(e.to_string()))?;
        f(&mut session)
    }

    fn start_ticker(&self) {
        let weak: Weak<RecorderInner> = Arc::downgrade(&self.inner);
        let task = ScheduledTask::every("recording-duration", TICK_PERIOD, move || {
            let Some(inner) = weak.upgrade() else {
                return TickFlow::Stop;
            };
            let state = match inner.session.lock() {
                Ok(mut session) => session.tick(),
                Err(_) => return TickFlow::Stop,
            };
            if state == RecorderState::Recording {
                TickFlow::Continue
            } else {
                TickFlow::Stop
            }
        });
        if let Ok(mut ticker) = self.inner.ticker.lock() {
            // Replacing the handle drops (and cancels) any previous ticker
            if let Some(previous) = ticker.replace(task) {
                if !previous.is_finished() {
                    log::warn!("Recorder: Replaced a ticker that was still running");
                }
            }
        }
    }

    fn stop_ticker(&self) {
        if let Ok(mut ticker) = self.inner.ticker.lock() {
            if let Some(task) = ticker.take() {
                task.cancel();
            }
        }
    }

    pub fn start(&self, stt: &SpeechToTextSettings) -> Result<(), RecorderError> {
        self.with_session(|s| s.start(stt))?;
        self.start_ticker();
        Ok(())
    }

    pub fn continue_recording(&self) -> Result<(), RecorderError> {
        self.with_session(|s| s.continue_recording())?;
        self.start_ticker();
        Ok(())
    }

    pub fn stop(&self) -> Result<(), RecorderError> {
        self.stop_ticker();
        self.with_session(|s| s.stop())
    }

    pub fn accept(&self) -> Result<RecordingPayload, RecorderError> {
        let payload = self.with_session(|s| s.accept());
        // The session is Idle whenever accept ran, so the ticker has nothing to do
        if !matches!(payload, Err(RecorderError::InvalidState { .. })) {
            self.stop_ticker();
        }
        payload
    }

    pub fn cancel(&self) {
        self.stop_ticker();
        if let Ok(mut session) = self.inner.session.lock() {
            session.cancel();
        }
    }

    pub fn state(&self) -> RecorderState {
        self.inner
            .session
            .lock()
            .map(|s| s.state())
            .unwrap_or(RecorderState::Idle)
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<RecorderState>> {
        self.inner.session.lock().ok().map(|s| s.subscribe())
    }

    pub fn total_duration_secs(&self) -> u32 {
        self.inner
            .session
            .lock()
            .map(|s| s.total_duration_secs())
            .unwrap_or(0)
    }

    pub fn segment_duration_secs(&self) -> u32 {
        self.inner
            .session
            .lock()
            .map(|s| s.segment_duration_secs())
            .unwrap_or(0)
    }

    pub fn levels(&self) -> Option<Vec<f32>> {
        self.inner.session.lock().ok().and_then(|s| s.levels())
    }

    pub fn has_active_device(&self) -> bool {
        self.inner
            .session
            .lock()
            .map(|s| s.has_active_device())
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio_capture::AudioChunk;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) const TEST_FORMAT: CaptureFormat = CaptureFormat {
        sample_rate: 16000,
        channels: 1,
    };

    /// Microphone double that appends a fixed number of samples on start.
    pub(crate) struct FakeInput {
        pub samples_per_start: usize,
        pub active: Arc<AtomicBool>,
        pub starts: Arc<AtomicUsize>,
        pub deny_permission: bool,
    }

    impl FakeInput {
        pub(crate) fn new(samples_per_start: usize) -> Self {
            Self {
                samples_per_start,
                active: Arc::new(AtomicBool::new(false)),
                starts: Arc::new(AtomicUsize::new(0)),
                deny_permission: false,
            }
        }
    }

    impl AudioInput for FakeInput {
        fn start(
            &mut self,
            buffer: SharedChunkBuffer,
            meter: SharedLevelMeter,
        ) -> Result<CaptureFormat, AudioCaptureError> {
            if self.deny_permission {
                return Err(AudioCaptureError::Permission("denied".to_string()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
            let samples = vec![0.25; self.samples_per_start];
            meter.lock().unwrap().push_samples(&samples);
            buffer.lock().unwrap().push(AudioChunk { samples });
            Ok(TEST_FORMAT)
        }

        fn stop(&mut self) {
            self.active.store(false, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn configured_stt() -> SpeechToTextSettings {
        SpeechToTextSettings {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    fn session(samples: usize) -> (RecorderSession, Arc<AtomicBool>) {
        let input = FakeInput::new(samples);
        let active = input.active.clone();
        (RecorderSession::new(Box::new(input)), active)
    }

    #[test]
    fn test_start_requires_configuration() {
        let (mut s, active) = session(16000);
        let err = s.start(&SpeechToTextSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(s.state(), RecorderState::Idle);
        assert!(!active.load(Ordering::SeqCst));
    }

    #[test]
    fn test_start_maps_device_errors() {
        let mut input = FakeInput::new(0);
        input.deny_permission = true;
        let mut s = RecorderSession::new(Box::new(input));
        let err = s.start(&configured_stt()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(s.state(), RecorderState::Idle);
    }

    #[test]
    fn test_start_rejected_when_not_idle() {
        let (mut s, _) = session(16000);
        s.start(&configured_stt()).unwrap();
        let err = s.start(&configured_stt()).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState { .. }));
        assert_eq!(s.state(), RecorderState::Recording);
    }

    #[test]
    fn test_stop_then_accept() {
        let (mut s, active) = session(16000);
        s.start(&configured_stt()).unwrap();
        s.tick();
        s.stop().unwrap();
        assert_eq!(s.state(), RecorderState::StoppedPendingDecision);
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(s.total_duration_secs(), 1);

        let payload = s.accept().unwrap();
        assert_eq!(&payload.wav_bytes[0..4], b"RIFF");
        assert_eq!(payload.format, TEST_FORMAT);
        assert!((payload.duration_secs - 1.0).abs() < f32::EPSILON);
        assert_eq!(s.state(), RecorderState::Idle);
        assert_eq!(s.chunk_count(), 0);
    }

    #[test]
    fn test_accept_short_recording_is_empty_and_resets() {
        // 0.25s at 16 kHz mono
        let (mut s, active) = session(4000);
        s.start(&configured_stt()).unwrap();
        s.stop().unwrap();

        let err = s.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyRecording);
        assert_eq!(s.state(), RecorderState::Idle);
        assert!(!active.load(Ordering::SeqCst));
    }

    #[test]
    fn test_accept_with_no_chunks_is_empty() {
        let (mut s, _) = session(0);
        s.start(&configured_stt()).unwrap();
        s.stop().unwrap();
        assert!(matches!(
            s.accept(),
            Err(RecorderError::EmptyRecording { bytes: 0, .. })
        ));
        assert_eq!(s.state(), RecorderState::Idle);
    }

    #[test]
    fn test_accept_only_after_stop() {
        let (mut s, _) = session(16000);
        assert!(matches!(
            s.accept(),
            Err(RecorderError::InvalidState { .. })
        ));
        s.start(&configured_stt()).unwrap();
        assert!(matches!(
            s.accept(),
            Err(RecorderError::InvalidState { .. })
        ));
        assert_eq!(s.state(), RecorderState::Recording);
    }

    #[test]
    fn test_ceiling_reaches_limit_and_keeps_chunks() {
        let (mut s, active) = session(16000);
        s.start(&configured_stt()).unwrap();
        for _ in 0..MAX_RECORDING_SECS - 1 {
            assert_eq!(s.tick(), RecorderState::Recording);
        }
        assert_eq!(s.tick(), RecorderState::LimitReached);
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(s.chunk_count(), 1);
        assert_eq!(s.total_duration_secs(), 120);

        // Ticks after the ceiling do nothing
        assert_eq!(s.tick(), RecorderState::LimitReached);
        assert_eq!(s.total_duration_secs(), 120);
    }

    #[test]
    fn test_two_segments_report_240_seconds() {
        let (mut s, _) = session(16000);
        s.start(&configured_stt()).unwrap();
        for _ in 0..MAX_RECORDING_SECS {
            s.tick();
        }
        s.continue_recording().unwrap();
        assert_eq!(s.state(), RecorderState::Recording);
        assert_eq!(s.chunk_count(), 2);
        for _ in 0..MAX_RECORDING_SECS {
            s.tick();
        }
        assert_eq!(s.state(), RecorderState::LimitReached);
        assert_eq!(s.total_duration_secs(), 240);
        assert_eq!(s.chunk_count(), 2);

        let payload = s.accept().unwrap();
        // Both segments are in the payload
        assert!((payload.duration_secs - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_accept_oversized_recording_is_rejected_and_resets() {
        // Just over 25 MiB once encoded as 16-bit mono
        let samples = MAX_PAYLOAD_BYTES / 2 + 16000;
        let (mut s, active) = session(samples);
        s.start(&configured_stt()).unwrap();
        s.stop().unwrap();

        let err = s.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
        assert!(matches!(
            err,
            RecorderError::PayloadTooLarge { bytes, limit } if bytes > limit
        ));
        assert_eq!(s.state(), RecorderState::Idle);
        assert_eq!(s.chunk_count(), 0);
        assert!(!active.load(Ordering::SeqCst));
    }

    #[test]
    fn test_continue_only_from_limit() {
        let (mut s, _) = session(16000);
        assert!(s.continue_recording().is_err());
        s.start(&configured_stt()).unwrap();
        s.stop().unwrap();
        assert!(matches!(
            s.continue_recording(),
            Err(RecorderError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cancel_is_idempotent_and_releases_device() {
        let (mut s, active) = session(16000);
        s.cancel();
        assert_eq!(s.state(), RecorderState::Idle);

        s.start(&configured_stt()).unwrap();
        s.tick();
        s.cancel();
        assert_eq!(s.state(), RecorderState::Idle);
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(s.chunk_count(), 0);
        assert_eq!(s.total_duration_secs(), 0);
        s.cancel();
        assert_eq!(s.state(), RecorderState::Idle);
    }

    #[test]
    fn test_idle_never_holds_device() {
        // Every operation sequence ends with no device when the state is Idle
        type Op = fn(&mut RecorderSession);
        let ops: [Op; 6] = [
            |s| {
                let _ = s.start(&configured_stt());
            },
            |s| {
                let _ = s.stop();
            },
            |s| s.cancel(),
            |s| {
                let _ = s.accept();
            },
            |s| {
                let _ = s.continue_recording();
            },
            |s| {
                for _ in 0..MAX_RECORDING_SECS {
                    s.tick();
                }
            },
        ];

        for a in 0..ops.len() {
            for b in 0..ops.len() {
                for c in 0..ops.len() {
                    let (mut s, active) = session(16000);
                    for op in [a, b, c] {
                        ops[op](&mut s);
                        if s.state() == RecorderState::Idle {
                            assert!(!active.load(Ordering::SeqCst));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_levels_only_while_recording() {
        let (mut s, _) = session(16000);
        assert!(s.levels().is_none());
        s.start(&configured_stt()).unwrap();
        let levels = s.levels().unwrap();
        assert_eq!(levels.len(), crate::level_meter::LEVEL_BUCKETS);
        s.stop().unwrap();
        assert!(s.levels().is_none());
    }

    #[test]
    fn test_state_is_published() {
        let mut s = RecorderSession::new(Box::new(FakeInput::new(16000))).with_max_segment_secs(2);
        let rx = s.subscribe();
        s.start(&configured_stt()).unwrap();
        assert_eq!(*rx.borrow(), RecorderState::Recording);
        s.tick();
        s.tick();
        assert_eq!(*rx.borrow(), RecorderState::LimitReached);
    }

    #[test]
    fn test_format_progress() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_progress(7), "0:07 / 2:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_recorder_ticker_hits_ceiling() {
        let input = FakeInput::new(16000);
        let active = input.active.clone();
        let recorder = SharedRecorder::from_session(
            RecorderSession::new(Box::new(input)).with_max_segment_secs(3),
        );
        let mut rx = recorder.subscribe().unwrap();

        recorder.start(&configured_stt()).unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(recorder.total_duration_secs(), 1);

        rx.wait_for(|s| *s == RecorderState::LimitReached)
            .await
            .unwrap();
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(recorder.total_duration_secs(), 3);

        recorder.continue_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        recorder.stop().unwrap();
        assert_eq!(recorder.total_duration_secs(), 4);

        // No further ticks after stop
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.total_duration_secs(), 4);
        assert_eq!(recorder.state(), RecorderState::StoppedPendingDecision);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_recorder_cancel_stops_ticker() {
        let recorder = SharedRecorder::new(Box::new(FakeInput::new(16000)));
        recorder.start(&configured_stt()).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        recorder.cancel();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(!recorder.has_active_device());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.total_duration_secs(), 0);
    }
}
