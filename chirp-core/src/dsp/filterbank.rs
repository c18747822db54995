//! Quantized mel filterbank.
//!
//! Reproduces the filterbank of the fixed-point microcontroller front end
//! the classifier was trained against:
//!
//! * HTK mel scale, `num_filters + 1` internal channels whose centers are
//!   evenly spaced in mel between the lower and upper band limits.
//! * Each internal channel owns the contiguous FFT bins whose mel value is
//!   at most its center. Bin ranges follow each other without overlap,
//!   starting at `start_index` (DC is always excluded).
//! * Every bin carries an integer `weight` (rising slope toward the
//!   channel center) and `unweight` (`2^bits - weight`, the falling slope
//!   of the previous channel), both rounded from `w · 2^bits`.
//! * Accumulation walks the channels in order. The weighted sum of a
//!   channel is emitted, and the unweighted sum seeds the next channel.
//!   The first emitted sum covers only the ramp below the lowest center
//!   and is dropped.
//!
//! Scale bits, rounding and accumulation order must not change: the
//! outputs are compared against the embedded implementation.

use tracing::debug;

use crate::error::{ChirpError, Result};

/// HTK mel scale: `1127 · ln(1 + f / 700)`.
pub fn hz_to_mel(hz: f64) -> f64 {
    1127.0 * (hz / 700.0).ln_1p()
}

/// Inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (mel / 1127.0).exp_m1()
}

/// Band limits and quantization of a [`FilterBank`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterBankParams {
    pub num_filters: usize,
    /// Number of power-spectrum bins (`window_size / 2 + 1`).
    pub num_bins: usize,
    pub sample_rate: u32,
    pub lower_band_hz: f64,
    pub upper_band_hz: f64,
    /// Weights are scaled by `2^filterbank_bits` before rounding.
    pub filterbank_bits: u32,
}

/// Precomputed channel layout and quantized weights.
///
/// Internally there are `num_channels + 1` channels; the extra leading one
/// only feeds the carry into the first output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBank {
    start_index: usize,
    end_index: usize,
    num_channels: usize,
    channel_starts: Vec<usize>,
    channel_widths: Vec<usize>,
    weights: Vec<Vec<i32>>,
    unweights: Vec<Vec<i32>>,
}

impl FilterBank {
    /// Build the channel layout and quantized weight tables.
    ///
    /// # Errors
    /// `ChirpError::InvalidConfig` for zero filters, fewer than two bins, a
    /// zero sample rate, inverted band limits, or more than 16 scale bits.
    pub fn new(params: &FilterBankParams) -> Result<Self> {
        let FilterBankParams {
            num_filters,
            num_bins,
            sample_rate,
            lower_band_hz,
            upper_band_hz,
            filterbank_bits,
        } = *params;

        if num_filters == 0 {
            return Err(ChirpError::InvalidConfig("filterbank needs at least one filter".into()));
        }
        if num_bins < 2 {
            return Err(ChirpError::InvalidConfig(format!(
                "filterbank needs at least two spectrum bins, got {num_bins}"
            )));
        }
        if sample_rate == 0 {
            return Err(ChirpError::InvalidConfig("sample rate must be positive".into()));
        }
        if !(lower_band_hz >= 0.0 && lower_band_hz < upper_band_hz) {
            return Err(ChirpError::InvalidConfig(format!(
                "invalid band limits {lower_band_hz}..{upper_band_hz} Hz"
            )));
        }
        if filterbank_bits > 16 {
            return Err(ChirpError::InvalidConfig(format!(
                "filterbank bits must be at most 16, got {filterbank_bits}"
            )));
        }

        let internal_channels = num_filters + 1;
        let mel_low = hz_to_mel(lower_band_hz);
        let mel_high = hz_to_mel(upper_band_hz);
        let mel_spacing = (mel_high - mel_low) / internal_channels as f64;
        let centers: Vec<f64> = (0..internal_channels)
            .map(|c| mel_low + mel_spacing * (c + 1) as f64)
            .collect();

        let hz_per_bin = 0.5 * sample_rate as f64 / (num_bins - 1) as f64;
        let start_index = ((1.5 + lower_band_hz / hz_per_bin) as usize).min(num_bins);

        let mut channel_starts = Vec::with_capacity(internal_channels);
        let mut channel_widths = Vec::with_capacity(internal_channels);
        let mut freq_index = start_index;
        for &center in &centers {
            let channel_start = freq_index;
            while freq_index < num_bins && hz_to_mel(freq_index as f64 * hz_per_bin) <= center {
                freq_index += 1;
            }
            channel_starts.push(channel_start);
            channel_widths.push(freq_index - channel_start);
        }

        let scale = (1u32 << filterbank_bits) as f64;
        let mut weights = Vec::with_capacity(internal_channels);
        let mut unweights = Vec::with_capacity(internal_channels);
        let mut end_index = 0;
        for c in 0..internal_channels {
            let lower_mel = if c == 0 { mel_low } else { centers[c - 1] };
            let span = centers[c] - lower_mel;
            let bins = channel_starts[c]..channel_starts[c] + channel_widths[c];

            let (w, u): (Vec<i32>, Vec<i32>) = bins
                .clone()
                .map(|bin| {
                    let weight = (centers[c] - hz_to_mel(bin as f64 * hz_per_bin)) / span;
                    quantize_weight(weight, scale)
                })
                .unzip();
            weights.push(w);
            unweights.push(u);

            end_index = end_index.max(bins.end);
        }

        debug!(
            num_filters,
            num_bins,
            sample_rate,
            start_index,
            end_index,
            "built quantized mel filterbank"
        );

        Ok(Self {
            start_index,
            end_index,
            num_channels: num_filters,
            channel_starts,
            channel_widths,
            weights,
            unweights,
        })
    }

    /// First FFT bin any channel reads.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// One past the last FFT bin any channel reads.
    pub fn end_index(&self) -> usize {
        self.end_index
    }

    /// Number of output channels (the requested filter count).
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// First FFT bin of each internal channel (`num_channels + 1` entries).
    pub fn channel_starts(&self) -> &[usize] {
        &self.channel_starts
    }

    /// Bin count of each internal channel (`num_channels + 1` entries).
    pub fn channel_widths(&self) -> &[usize] {
        &self.channel_widths
    }

    pub fn weights(&self, channel: usize) -> &[i32] {
        &self.weights[channel]
    }

    pub fn unweights(&self, channel: usize) -> &[i32] {
        &self.unweights[channel]
    }

    /// Zero every bin the filterbank does not cover.
    pub fn mask(&self, power: &mut [f64]) {
        let len = power.len();
        power[..self.start_index.min(len)].fill(0.0);
        if self.end_index < len {
            power[self.end_index..].fill(0.0);
        }
    }

    /// Weighted channel energies (before the square root), one per output channel.
    pub fn accumulate(&self, power: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.num_channels);
        let mut weight_acc = 0.0f64;
        let mut unweight_acc = 0.0f64;

        for c in 0..=self.num_channels {
            let start = self.channel_starts[c];
            for (j, (&w, &u)) in self.weights[c].iter().zip(&self.unweights[c]).enumerate() {
                let p = power.get(start + j).copied().unwrap_or(0.0);
                weight_acc += w as f64 * p;
                unweight_acc += u as f64 * p;
            }
            if c > 0 {
                out.push(weight_acc);
            }
            weight_acc = unweight_acc;
            unweight_acc = 0.0;
        }
        out
    }
}

/// `(weight, unweight)` rounded half-up at `scale`.
fn quantize_weight(weight: f64, scale: f64) -> (i32, i32) {
    let w = (weight * scale + 0.5).floor() as i32;
    let u = ((1.0 - weight) * scale + 0.5).floor() as i32;
    (w, u)
}
