//! Fixed-shape log mel spectrogram fed to the classifier.

use serde::Serialize;

use super::filterbank::FilterBank;
use super::spectrogram::SpectrogramData;

/// Log-compressed filterbank energies, `[frames][bands]`.
///
/// Always exactly `num_frames` rows: shorter inputs are padded with zero
/// rows, longer ones truncated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MelSpectrogram {
    rows: Vec<Vec<f32>>,
    num_bands: usize,
}

impl MelSpectrogram {
    /// Wrap precomputed rows, padding or truncating to `num_frames`.
    pub fn from_rows(mut rows: Vec<Vec<f32>>, num_frames: usize, num_bands: usize) -> Self {
        for row in rows.iter_mut() {
            row.resize(num_bands, 0.0);
        }
        rows.resize_with(num_frames, || vec![0.0; num_bands]);
        Self { rows, num_bands }
    }

    pub fn num_frames(&self) -> usize {
        self.rows.len()
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// `(frames, bands)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.num_bands)
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    /// Row-major copy of all values.
    pub fn flatten(&self) -> Vec<f32> {
        self.rows.iter().flatten().copied().collect()
    }
}

/// Run the filterbank over every frame of a power spectrogram.
///
/// Per frame: mask bins outside the filterbank, accumulate with carry,
/// take the square root, then `ln(x) · 2^log_scale_shift` (zero for `x ≤ 1`).
pub(crate) fn compute(
    power: &SpectrogramData,
    bank: &FilterBank,
    log_scale_shift: u32,
    num_frames: usize,
) -> MelSpectrogram {
    let log_scale = (1u32 << log_scale_shift) as f64;
    let mut masked = Vec::with_capacity(power.num_bins());

    let rows = power
        .magnitudes
        .iter()
        .take(num_frames)
        .map(|frame| {
            masked.clear();
            masked.extend_from_slice(frame);
            bank.mask(&mut masked);
            bank.accumulate(&masked)
                .into_iter()
                .map(|energy| {
                    let amplitude = energy.sqrt();
                    if amplitude > 1.0 {
                        (amplitude.ln() * log_scale) as f32
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    MelSpectrogram::from_rows(rows, num_frames, bank.num_channels())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_pads_short_input() {
        let mel = MelSpectrogram::from_rows(vec![vec![1.0; 4]; 3], 5, 4);
        assert_eq!(mel.shape(), (5, 4));
        assert_eq!(mel.rows()[2], vec![1.0; 4]);
        assert_eq!(mel.rows()[3], vec![0.0; 4]);
        assert_eq!(mel.rows()[4], vec![0.0; 4]);
    }

    #[test]
    fn from_rows_truncates_long_input() {
        let rows: Vec<Vec<f32>> = (0..8).map(|i| vec![i as f32; 2]).collect();
        let mel = MelSpectrogram::from_rows(rows, 5, 2);
        assert_eq!(mel.shape(), (5, 2));
        assert_eq!(mel.rows()[4], vec![4.0, 4.0]);
        assert_eq!(mel.flatten().len(), 10);
    }
}
