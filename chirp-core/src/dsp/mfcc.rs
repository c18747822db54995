//! Mel-frequency cepstral coefficients.
//!
//! Uses a plain floating-point triangular filterbank rather than the
//! quantized one, since MFCCs are not part of the classifier input.

use std::f64::consts::PI;

use serde::Serialize;

use super::filterbank::{hz_to_mel, mel_to_hz};
use super::spectrogram::{SpectrogramData, POWER_EPSILON};

/// Cepstral coefficients per frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfccData {
    /// `[frame][coefficient]`.
    pub coefficients: Vec<Vec<f32>>,
    /// Start time of each frame in seconds.
    pub times: Vec<f64>,
}

/// Triangular HTK-mel filters over `0..=window_size/2`, `[filter][bin]`.
pub(crate) fn triangular_filters(
    num_filters: usize,
    window_size: usize,
    sample_rate: u32,
    lower_hz: f64,
    upper_hz: f64,
) -> Vec<Vec<f64>> {
    let num_bins = window_size / 2 + 1;
    let mel_min = hz_to_mel(lower_hz);
    let mel_max = hz_to_mel(upper_hz);

    let hz_pts: Vec<f64> = (0..num_filters + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (num_filters + 1) as f64))
        .collect();
    let bin_hz: Vec<f64> = (0..num_bins)
        .map(|k| k as f64 * sample_rate as f64 / window_size as f64)
        .collect();

    (0..num_filters)
        .map(|m| {
            let (lower, center, upper) = (hz_pts[m], hz_pts[m + 1], hz_pts[m + 2]);
            let rise = (center - lower).max(1e-10);
            let fall = (upper - center).max(1e-10);
            bin_hz
                .iter()
                .map(|&f| {
                    if f >= lower && f <= center {
                        (f - lower) / rise
                    } else if f > center && f <= upper {
                        (upper - f) / fall
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Unnormalized DCT-II: `c_k = Σ_m x_m · cos(π k (m + ½) / M)`.
pub(crate) fn dct_ii(input: &[f64], num_out: usize) -> Vec<f64> {
    let m_len = input.len() as f64;
    (0..num_out)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(m, &x)| x * (PI * k as f64 * (m as f64 + 0.5) / m_len).cos())
                .sum()
        })
        .collect()
}

pub(crate) fn compute(
    power: &SpectrogramData,
    filters: &[Vec<f64>],
    num_coefficients: usize,
) -> MfccData {
    let coefficients = power
        .magnitudes
        .iter()
        .map(|frame| {
            let log_energies: Vec<f64> = filters
                .iter()
                .map(|filter| {
                    let energy: f64 = filter.iter().zip(frame).map(|(w, p)| w * p).sum();
                    energy.max(POWER_EPSILON).ln()
                })
                .collect();
            dct_ii(&log_energies, num_coefficients)
                .into_iter()
                .map(|c| c as f32)
                .collect()
        })
        .collect();

    MfccData {
        coefficients,
        times: power.times.clone(),
    }
}
