//! Frequency-domain loudness analysis
//!
//! Mirrors a browser analyser node: a 256-point FFT over the most recent
//! samples, Blackman window, exponential smoothing across frames and a byte
//! scale of decibel magnitudes.

use rustfft::{num_complex::Complex, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) const FFT_SIZE: usize = 256;
pub(crate) const BIN_COUNT: usize = FFT_SIZE / 2;

const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Byte level treated as full scale when normalizing
pub(crate) const REFERENCE_CEILING: f32 = 128.0;

pub(crate) struct SpectrumAnalyser {
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub(crate) fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let n = FFT_SIZE as f32;
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            fft,
            window,
            samples: std::iter::repeat(0.0).take(FFT_SIZE).collect(),
            smoothed: vec![0.0; BIN_COUNT],
        }
    }

    /// Append time-domain samples, keeping only the last `FFT_SIZE`
    pub(crate) fn push_samples(&mut self, samples: &[f32]) {
        for &s in samples {
            if self.samples.len() == FFT_SIZE {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
    }

    /// Analyse the current window and return one byte per frequency bin
    pub(crate) fn byte_frequency_data(&mut self) -> Vec<u8> {
        let mut buffer: Vec<Complex<f32>> = self
            .samples
            .iter()
            .zip(&self.window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let scale = 1.0 / FFT_SIZE as f32;
        self.smoothed
            .iter_mut()
            .zip(&buffer[..BIN_COUNT])
            .map(|(prev, bin)| {
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * bin.norm() * scale;
                to_byte(*prev)
            })
            .collect()
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

/// Mean bin level divided by the reference ceiling, clamped to `[0, 1]`
pub(crate) fn normalized_level(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    let mean = sum as f32 / bins.len() as f32;
    (mean / REFERENCE_CEILING).min(1.0)
}

#[cfg(test)]
pub(crate) fn tone(len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * 8.0 * i as f32 / FFT_SIZE as f32).sin())
        .collect()
}
