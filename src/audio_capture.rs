//! Audio capture module using cpal for cross-platform audio input.
//!
//! Capture runs on a dedicated thread (cpal streams are not `Send` on every
//! platform). Each input callback buffer is appended as one [`AudioChunk`] to a
//! shared [`ChunkBuffer`] and fed to the level meter. The recorder freezes the
//! chunks into 16-bit mono WAV bytes when the recording is accepted.

use crate::error::ErrorKind;
use crate::level_meter::SharedLevelMeter;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use hound::{WavSpec, WavWriter};
use std::io::Cursor;
use std::sync::mpsc;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Errors that can occur during audio capture
#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("Microphone access denied: {0}")]
    Permission(String),

    #[error("No input device available")]
    NoInputDevice,

    #[error("Input device is busy: {0}")]
    DeviceBusy(String),

    #[error("Failed to get device config: {0}")]
    DeviceConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamStart(String),

    #[error("Failed to encode audio: {0}")]
    Encoding(String),

    #[error("Capture thread error: {0}")]
    ThreadError(String),
}

impl AudioCaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioCaptureError::Permission(_) => ErrorKind::Permission,
            AudioCaptureError::NoInputDevice => ErrorKind::DeviceNotFound,
            AudioCaptureError::DeviceBusy(_) => ErrorKind::DeviceBusy,
            AudioCaptureError::DeviceConfig(_)
            | AudioCaptureError::StreamBuild(_)
            | AudioCaptureError::StreamStart(_) => ErrorKind::DeviceBusy,
            AudioCaptureError::Encoding(_) | AudioCaptureError::ThreadError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Map a backend-specific platform message onto the capture taxonomy.
    fn from_backend_message(description: String, fallback: fn(String) -> Self) -> Self {
        let lower = description.to_lowercase();
        if lower.contains("permission")
            || lower.contains("denied")
            || lower.contains("not authorized")
            || lower.contains("not permitted")
        {
            AudioCaptureError::Permission(description)
        } else if lower.contains("busy") || lower.contains("in use") || lower.contains("exclusive") {
            AudioCaptureError::DeviceBusy(description)
        } else {
            fallback(description)
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioCaptureError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => AudioCaptureError::NoInputDevice,
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                Self::from_backend_message(err.description, AudioCaptureError::DeviceConfig)
            }
            other => AudioCaptureError::DeviceConfig(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for AudioCaptureError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => AudioCaptureError::NoInputDevice,
            cpal::BuildStreamError::BackendSpecific { err } => {
                Self::from_backend_message(err.description, AudioCaptureError::StreamBuild)
            }
            other => AudioCaptureError::StreamBuild(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioCaptureError {
    fn from(e: cpal::PlayStreamError) -> Self {
        match e {
            cpal::PlayStreamError::DeviceNotAvailable => AudioCaptureError::NoInputDevice,
            cpal::PlayStreamError::BackendSpecific { err } => {
                Self::from_backend_message(err.description, AudioCaptureError::StreamStart)
            }
        }
    }
}

/// Sample rate and channel count of captured audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl CaptureFormat {
    /// Bytes per second of 16-bit PCM at this format.
    pub fn pcm16_bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels.max(1) as usize * 2
    }
}

/// One capture callback buffer of interleaved samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// Basic audio level metrics for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct AudioLevelStats {
    pub duration_secs: f32,
    /// Root-mean-square amplitude in [0, 1].
    pub rms: f32,
    /// Peak (max absolute) amplitude in [0, 1].
    pub peak: f32,
}

pub type SharedChunkBuffer = Arc<StdMutex<ChunkBuffer>>;

/// Ordered chunks of one logical recording, possibly spanning several segments.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    format: Option<CaptureFormat>,
    chunks: Vec<AudioChunk>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedChunkBuffer {
        Arc::new(StdMutex::new(Self::new()))
    }

    /// Record the format of a segment about to be appended.
    ///
    /// A continued recording must keep the format of the chunks it extends.
    pub fn begin_segment(&mut self, format: CaptureFormat) -> Result<(), AudioCaptureError> {
        match self.format {
            Some(existing) if !self.chunks.is_empty() && existing != format => {
                Err(AudioCaptureError::DeviceConfig(format!(
                    "Input format changed from {} Hz/{} ch to {} Hz/{} ch",
                    existing.sample_rate, existing.channels, format.sample_rate, format.channels
                )))
            }
            _ => {
                self.format = Some(format);
                Ok(())
            }
        }
    }

    /// Append one chunk. Chunk order is capture order.
    pub fn push(&mut self, chunk: AudioChunk) {
        if !chunk.samples.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.format = None;
    }

    pub fn format(&self) -> Option<CaptureFormat> {
        self.format
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(|c| c.samples.len()).sum()
    }

    /// Size of the captured audio as 16-bit PCM at the capture format.
    pub fn pcm16_byte_len(&self) -> usize {
        self.sample_count() * 2
    }

    pub fn duration_secs(&self) -> f32 {
        match self.format {
            Some(format) => {
                self.sample_count() as f32
                    / (format.sample_rate.max(1) as f32 * format.channels.max(1) as f32)
            }
            None => 0.0,
        }
    }

    pub fn level_stats(&self) -> AudioLevelStats {
        let mut peak: f32 = 0.0;
        let mut sum_sq: f64 = 0.0;
        let mut n: u64 = 0;

        for &s in self.chunks.iter().flat_map(|c| c.samples.iter()) {
            peak = peak.max(s.abs());
            // Promote to f64 for numerical stability on long recordings.
            sum_sq += (s as f64) * (s as f64);
            n += 1;
        }

        let rms = if n == 0 {
            0.0
        } else {
            (sum_sq / n as f64).sqrt() as f32
        };

        AudioLevelStats {
            duration_secs: self.duration_secs(),
            rms,
            peak,
        }
    }

    /// Encode the chunks as 16-bit mono WAV bytes.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, AudioCaptureError> {
        let format = self
            .format
            .ok_or_else(|| AudioCaptureError::Encoding("No capture format recorded".to_string()))?;
        let channels = format.channels.max(1) as usize;

        let spec = WavSpec {
            channels: 1,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| AudioCaptureError::Encoding(e.to_string()))?;

            for chunk in &self.chunks {
                for frame in chunk.samples.chunks(channels) {
                    let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                    // Convert f32 [-1.0, 1.0] to i16
                    let sample_i16 = (mono.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    writer
                        .write_sample(sample_i16)
                        .map_err(|e| AudioCaptureError::Encoding(e.to_string()))?;
                }
            }

            writer
                .finalize()
                .map_err(|e| AudioCaptureError::Encoding(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

/// Average interleaved frames down to one channel.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// A microphone the recorder can start and stop.
///
/// Implementations append chunks to `buffer` and feed `meter` until stopped.
/// `stop` must release the device before returning.
pub trait AudioInput: Send {
    fn start(
        &mut self,
        buffer: SharedChunkBuffer,
        meter: SharedLevelMeter,
    ) -> Result<CaptureFormat, AudioCaptureError>;

    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Commands sent to the audio capture thread
enum CaptureCommand {
    Stop,
}

/// Handle to a running audio capture session
struct CaptureHandle {
    command_tx: mpsc::Sender<CaptureCommand>,
    thread_handle: JoinHandle<()>,
}

/// cpal-backed microphone.
///
/// The stream lives on its own thread and is dropped there when stopped.
pub struct CpalInput {
    device_name: Option<String>,
    capture_handle: Option<CaptureHandle>,
}

impl CpalInput {
    /// Capture from the named device, or the host default when `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            capture_handle: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, AudioCaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| AudioCaptureError::DeviceConfig(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or(AudioCaptureError::NoInputDevice),
            None => host
                .default_input_device()
                .ok_or(AudioCaptureError::NoInputDevice),
        }
    }
}

impl Default for CpalInput {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AudioInput for CpalInput {
    fn start(
        &mut self,
        buffer: SharedChunkBuffer,
        meter: SharedLevelMeter,
    ) -> Result<CaptureFormat, AudioCaptureError> {
        // Stop any existing capture
        self.stop();

        let device = self.find_device()?;
        let config = device.default_input_config()?;
        let format = CaptureFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            format.sample_rate,
            format.channels,
            config.sample_format()
        );

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                run_capture_thread(
                    device,
                    stream_config,
                    sample_format,
                    format.channels,
                    buffer,
                    meter,
                    command_rx,
                    ready_tx,
                )
            })
            .map_err(|e| AudioCaptureError::ThreadError(e.to_string()))?;

        // Stream build and play errors surface here so the caller sees them.
        let ready = ready_rx
            .recv()
            .map_err(|_| AudioCaptureError::ThreadError("Capture thread exited".to_string()))
            .and_then(|r| r);
        if let Err(e) = ready {
            let _ = thread_handle.join();
            return Err(e);
        }

        self.capture_handle = Some(CaptureHandle {
            command_tx,
            thread_handle,
        });

        log::info!("Audio capture started");
        Ok(format)
    }

    fn stop(&mut self) {
        if let Some(handle) = self.capture_handle.take() {
            log::info!("Stopping audio capture");
            // Send stop command (ignore error if thread already stopped)
            let _ = handle.command_tx.send(CaptureCommand::Stop);
            let _ = handle.thread_handle.join();
        }
    }

    fn is_active(&self) -> bool {
        self.capture_handle.is_some()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the callback shared by every sample format.
fn on_samples(
    buffer: &SharedChunkBuffer,
    meter: &SharedLevelMeter,
    channels: u16,
    samples: Vec<f32>,
) {
    if let Ok(mut m) = meter.lock() {
        m.push_samples(&downmix_to_mono(&samples, channels));
    }
    if let Ok(mut buf) = buffer.lock() {
        buf.push(AudioChunk { samples });
    }
}

/// Run the audio capture in a dedicated thread
#[allow(clippy::too_many_arguments)]
fn run_capture_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
    channels: u16,
    buffer: SharedChunkBuffer,
    meter: SharedLevelMeter,
    command_rx: mpsc::Receiver<CaptureCommand>,
    ready_tx: mpsc::Sender<Result<(), AudioCaptureError>>,
) {
    use cpal::Sample;

    let err_fn = |err| {
        log::error!("Audio stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_samples(&buffer, &meter, channels, data.to_vec());
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| s.to_float_sample()).collect();
                on_samples(&buffer, &meter, channels, samples);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| s.to_float_sample()).collect();
                on_samples(&buffer, &meter, channels, samples);
            },
            err_fn,
            None,
        ),
        _ => {
            let _ = ready_tx.send(Err(AudioCaptureError::DeviceConfig(format!(
                "Unsupported sample format: {:?}",
                sample_format
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Wait for stop command
    loop {
        match command_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(CaptureCommand::Stop) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Stream is dropped here, releasing the device
    drop(stream);
    log::debug!("Audio capture thread exiting");
}

/// Get the list of available input devices
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Get information about the default input device
pub fn get_default_input_device_info() -> Option<(String, u32, u16)> {
    let host = cpal::default_host();
    let device = host.default_input_device()?;
    let name = device.name().ok()?;
    let config = device.default_input_config().ok()?;
    Some((name, config.sample_rate().0, config.channels()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO_16K: CaptureFormat = CaptureFormat {
        sample_rate: 16000,
        channels: 1,
    };

    #[test]
    fn test_chunk_buffer_keeps_capture_order() {
        let mut buffer = ChunkBuffer::new();
        buffer.begin_segment(MONO_16K).unwrap();
        buffer.push(AudioChunk { samples: vec![0.1] });
        buffer.push(AudioChunk { samples: vec![0.2, 0.3] });
        buffer.push(AudioChunk { samples: vec![] });

        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.sample_count(), 3);
        assert_eq!(buffer.pcm16_byte_len(), 6);
    }

    #[test]
    fn test_duration_uses_format() {
        let mut buffer = ChunkBuffer::new();
        buffer
            .begin_segment(CaptureFormat {
                sample_rate: 1000,
                channels: 2,
            })
            .unwrap();
        buffer.push(AudioChunk {
            samples: vec![0.0; 4000],
        });
        assert_eq!(buffer.duration_secs(), 2.0);
    }

    #[test]
    fn test_continued_segment_must_keep_format() {
        let mut buffer = ChunkBuffer::new();
        buffer.begin_segment(MONO_16K).unwrap();
        buffer.push(AudioChunk { samples: vec![0.0; 10] });

        let err = buffer
            .begin_segment(CaptureFormat {
                sample_rate: 48000,
                channels: 1,
            })
            .unwrap_err();
        assert!(matches!(err, AudioCaptureError::DeviceConfig(_)));
        assert!(buffer.begin_segment(MONO_16K).is_ok());
    }

    #[test]
    fn test_wav_is_mono_pcm16() {
        let mut buffer = ChunkBuffer::new();
        buffer
            .begin_segment(CaptureFormat {
                sample_rate: 16000,
                channels: 2,
            })
            .unwrap();
        // 0.1 seconds of stereo: left 0.5, right -0.5 downmixes to silence
        let samples: Vec<f32> = (0..3200).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        buffer.push(AudioChunk { samples });

        let wav_bytes = buffer.to_wav_bytes().unwrap();
        assert_eq!(&wav_bytes[0..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(wav_bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(reader.len(), 1600);
        assert!(reader
            .into_samples::<i16>()
            .all(|s| s.map(|v| v == 0).unwrap_or(false)));
    }

    #[test]
    fn test_wav_without_format_fails() {
        let buffer = ChunkBuffer::new();
        assert!(matches!(
            buffer.to_wav_bytes(),
            Err(AudioCaptureError::Encoding(_))
        ));
    }

    #[test]
    fn test_level_stats() {
        let mut buffer = ChunkBuffer::new();
        buffer.begin_segment(MONO_16K).unwrap();
        buffer.push(AudioChunk {
            samples: vec![0.5, -1.0, 0.0, 0.0],
        });
        let stats = buffer.level_stats();
        assert_eq!(stats.peak, 1.0);
        assert!(stats.rms > 0.5 && stats.rms < 0.6);
    }

    #[test]
    fn test_backend_messages_are_classified() {
        let err = AudioCaptureError::from_backend_message(
            "Permission denied by the user".to_string(),
            AudioCaptureError::StreamBuild,
        );
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = AudioCaptureError::from_backend_message(
            "Device or resource busy".to_string(),
            AudioCaptureError::StreamBuild,
        );
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);

        let err = AudioCaptureError::from(cpal::BuildStreamError::DeviceNotAvailable);
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix_to_mono(&[0.3], 1), vec![0.3]);
    }
}
