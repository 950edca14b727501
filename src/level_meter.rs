//! Input level meter for the recording waveform.
//!
//! Mirrors a WebAudio `AnalyserNode` with `fftSize = 256`: the most recent 256
//! samples are Blackman-windowed, transformed, smoothed over time and mapped to
//! bytes over a -100..-30 dB range. The byte spectrum is then averaged into
//! [`LEVEL_BUCKETS`] bars scaled 0 to 100.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

pub const FFT_SIZE: usize = 256;
pub const LEVEL_BUCKETS: usize = 20;

const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub type SharedLevelMeter = Arc<Mutex<LevelMeter>>;

pub struct LevelMeter {
    fft: Arc<dyn Fft<f32>>,
    /// Pre-computed Blackman window
    window: Vec<f32>,
    /// Ring buffer of the most recent input samples
    ring: Vec<f32>,
    write_index: usize,
    /// Smoothed magnitude per frequency bin
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for LevelMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelMeter")
            .field("write_index", &self.write_index)
            .finish_non_exhaustive()
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Blackman window with alpha = 0.16, as used by AnalyserNode
        let alpha = 0.16f32;
        let a0 = 0.5 * (1.0 - alpha);
        let a1 = 0.5;
        let a2 = 0.5 * alpha;
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = i as f32 / FFT_SIZE as f32;
                a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
            })
            .collect();

        Self {
            fft,
            window,
            ring: vec![0.0; FFT_SIZE],
            write_index: 0,
            smoothed: vec![0.0; FFT_SIZE / 2],
        }
    }

    pub fn shared() -> SharedLevelMeter {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Feed mono samples in `[-1.0, 1.0]`. Called from the capture callback.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.ring[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % FFT_SIZE;
        }
    }

    /// Forget all input and smoothing state.
    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
        self.write_index = 0;
    }

    /// Byte frequency data (`getByteFrequencyData`), one value per bin.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        // Oldest sample first
        let mut buffer: Vec<Complex<f32>> = (0..FFT_SIZE)
            .map(|i| {
                let sample = self.ring[(self.write_index + i) % FFT_SIZE];
                Complex::new(sample * self.window[i], 0.0)
            })
            .collect();

        self.fft.process(&mut buffer);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        buffer[..FFT_SIZE / 2]
            .iter()
            .zip(self.smoothed.iter_mut())
            .map(|(bin, smoothed)| {
                let magnitude = bin.norm() / FFT_SIZE as f32;
                *smoothed = SMOOTHING_TIME_CONSTANT * *smoothed
                    + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;

                let db = if *smoothed > 0.0 {
                    20.0 * smoothed.log10()
                } else {
                    f32::NEG_INFINITY
                };
                let scaled = 255.0 * (db - MIN_DECIBELS) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// One frame of waveform bars, each in `0.0..=100.0`.
    pub fn levels(&mut self) -> Vec<f32> {
        bucket_levels(&self.byte_frequency_data())
    }
}

/// Average byte frequency data into [`LEVEL_BUCKETS`] bars scaled 0 to 100.
pub fn bucket_levels(data: &[u8]) -> Vec<f32> {
    let step = data.len() / LEVEL_BUCKETS;
    if step == 0 {
        return vec![0.0; LEVEL_BUCKETS];
    }
    (0..LEVEL_BUCKETS)
        .map(|i| {
            let sum: u32 = data[i * step..(i + 1) * step].iter().map(|&b| b as u32).sum();
            let average = sum as f32 / step as f32;
            (average / 255.0 * 100.0).min(100.0)
        })
        .collect()
}
