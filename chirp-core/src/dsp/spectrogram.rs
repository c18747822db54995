//! Short-time power spectrum and its dB rendering.

use std::f64::consts::PI;

use serde::Serialize;

use super::fft::power_spectrum;
use crate::audio::AudioSignal;

/// Floor applied before taking logarithms of power values.
pub const POWER_EPSILON: f64 = 1e-10;

/// Offset added to dB values so typical content lands above zero.
const DB_OFFSET: f64 = 80.0;

/// Framed spectral analysis of a signal.
///
/// `magnitudes[frame][bin]` holds power (|X|²) after [`stft`] and dB after
/// [`to_decibel`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrogramData {
    /// Bin center frequencies in Hz, `0..=window_size/2`.
    pub frequencies: Vec<f64>,
    /// Start time of each frame in seconds.
    pub times: Vec<f64>,
    pub magnitudes: Vec<Vec<f64>>,
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
}

impl SpectrogramData {
    pub fn num_frames(&self) -> usize {
        self.times.len()
    }

    pub fn num_bins(&self) -> usize {
        self.frequencies.len()
    }
}

/// Periodic Hann window of length `n`.
pub(crate) fn hann_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos()))
        .collect()
}

/// Number of full windows that fit in `len` samples.
pub(crate) fn frame_count(len: usize, window_size: usize, hop_size: usize) -> usize {
    if len < window_size || hop_size == 0 {
        0
    } else {
        (len - window_size) / hop_size + 1
    }
}

/// Hann-windowed power spectrogram. `window_size` must be a power of two.
///
/// Signals shorter than one window yield zero frames.
pub(crate) fn stft(signal: &AudioSignal, window_size: usize, hop_size: usize) -> SpectrogramData {
    let data = signal.data();
    let sample_rate = signal.sample_rate();
    let window = hann_window(window_size);
    let frames = frame_count(data.len(), window_size, hop_size);

    let mut frame_buf = vec![0.0f64; window_size];
    let mut magnitudes = Vec::with_capacity(frames);
    let mut times = Vec::with_capacity(frames);

    for frame in 0..frames {
        let start = frame * hop_size;
        for (i, slot) in frame_buf.iter_mut().enumerate() {
            *slot = data[start + i] as f64 * window[i];
        }
        magnitudes.push(power_spectrum(&frame_buf));
        times.push(start as f64 / sample_rate as f64);
    }

    let frequencies = (0..=window_size / 2)
        .map(|k| k as f64 * sample_rate as f64 / window_size as f64)
        .collect();

    SpectrogramData {
        frequencies,
        times,
        magnitudes,
        sample_rate,
        window_size,
        hop_size,
    }
}

/// Convert a power spectrogram to display dB:
/// `max(0, 20·log10(max(p, ε)) + 80)`.
pub(crate) fn to_decibel(power: &SpectrogramData) -> SpectrogramData {
    let magnitudes = power
        .magnitudes
        .iter()
        .map(|row| {
            row.iter()
                .map(|&p| (20.0 * p.max(POWER_EPSILON).log10() + DB_OFFSET).max(0.0))
                .collect()
        })
        .collect();

    SpectrogramData {
        magnitudes,
        ..power.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, len: usize, amplitude: f32) -> AudioSignal {
        let data = (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        AudioSignal::mono(data, sample_rate)
    }

    fn peak_bin(row: &[f64]) -> usize {
        row.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    #[test]
    fn sine_peaks_at_expected_bin() {
        for &(freq, window) in &[(1_000.0, 4096usize), (440.0, 1024), (3_150.0, 512)] {
            let signal = sine(freq, 16_000, 8_192, 0.5);
            let spec = stft(&signal, window, window / 4);
            let expected = (freq * window as f64 / 16_000.0).round() as isize;
            for row in &spec.magnitudes {
                let peak = peak_bin(row) as isize;
                assert!(
                    (peak - expected).abs() <= 1,
                    "freq={freq} window={window} peak={peak} expected={expected}"
                );
            }
        }
    }

    #[test]
    fn frame_layout_and_timestamps() {
        let signal = sine(500.0, 16_000, 32_000, 0.5);
        let power = stft(&signal, 4096, 512);
        assert_eq!(power.num_frames(), 55);
        assert_eq!(power.num_bins(), 2049);
        assert_eq!(power.magnitudes.len(), power.times.len());
        assert!(power.magnitudes.iter().all(|row| row.len() == power.frequencies.len()));
        assert!((power.times[1] - 0.032).abs() < 1e-12);
        assert!((power.frequencies[1] - 3.90625).abs() < 1e-12);
    }

    #[test]
    fn short_signal_has_no_frames() {
        let signal = sine(500.0, 16_000, 1_000, 0.5);
        let power = stft(&signal, 4096, 512);
        assert_eq!(power.num_frames(), 0);
        assert_eq!(power.num_bins(), 2049);
    }

    #[test]
    fn decibels_are_offset_and_floored() {
        let power = SpectrogramData {
            frequencies: vec![0.0, 1.0, 2.0],
            times: vec![0.0],
            magnitudes: vec![vec![1.0, 0.0, 1e-6]],
            sample_rate: 4,
            window_size: 4,
            hop_size: 4,
        };
        let db = to_decibel(&power);
        assert!((db.magnitudes[0][0] - 80.0).abs() < 1e-9);
        assert_eq!(db.magnitudes[0][1], 0.0);
        assert!((db.magnitudes[0][2] - (-120.0f64 + 80.0).max(0.0)).abs() < 1e-9);
        assert_eq!(db.times, power.times);
    }
}
