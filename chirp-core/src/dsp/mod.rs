//! Deterministic feature extraction.
//!
//! [`DspEngine`] bundles the operating point ([`DspConfig`]) with the
//! individual stages: loudest-slice extraction, int16 quantization, FFT,
//! STFT, the quantized mel filterbank, mel spectrogram and MFCC. All
//! stages are pure functions of their input and the config.

pub mod fft;
pub mod filterbank;
pub mod mel;
pub mod mfcc;
pub mod slice;
pub mod spectrogram;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::AudioSignal;
use crate::error::{ChirpError, Result};

pub use filterbank::{hz_to_mel, mel_to_hz, FilterBank, FilterBankParams};
pub use mel::MelSpectrogram;
pub use mfcc::MfccData;
pub use spectrogram::{SpectrogramData, POWER_EPSILON};

/// Analysis parameters. Defaults match the deployed classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DspConfig {
    pub window_size: usize,
    pub hop_size: usize,
    /// Mel bands in the spectrogram (and MFCC coefficients per frame).
    pub num_coefficients: usize,
    pub lower_band_hz: f64,
    pub upper_band_hz: f64,
    pub filterbank_bits: u32,
    pub log_scale_shift: u32,
    /// Rows in every mel spectrogram.
    pub num_frames: usize,
    /// Length of the loudest slice fed to the mel stage.
    pub slice_ms: u32,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            hop_size: 512,
            num_coefficients: 40,
            lower_band_hz: 125.0,
            upper_band_hz: 7500.0,
            filterbank_bits: 12,
            log_scale_shift: 6,
            num_frames: 55,
            slice_ms: 2000,
        }
    }
}

impl DspConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || !self.window_size.is_power_of_two() {
            return Err(ChirpError::InvalidConfig(format!(
                "windowSize must be a power of two, got {}",
                self.window_size
            )));
        }
        if self.hop_size == 0 {
            return Err(ChirpError::InvalidConfig("hopSize must be non-zero".into()));
        }
        if self.num_coefficients == 0 || self.num_frames == 0 {
            return Err(ChirpError::InvalidConfig(
                "numCoefficients and numFrames must be non-zero".into(),
            ));
        }
        if self.log_scale_shift > 16 {
            return Err(ChirpError::InvalidConfig(format!(
                "logScaleShift must be at most 16, got {}",
                self.log_scale_shift
            )));
        }
        Ok(())
    }

    /// Power-spectrum bins per frame.
    pub fn num_bins(&self) -> usize {
        self.window_size / 2 + 1
    }
}

/// Stateless DSP stages over a validated [`DspConfig`].
#[derive(Debug, Clone)]
pub struct DspEngine {
    config: DspConfig,
}

impl DspEngine {
    pub fn new(config: DspConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DspConfig {
        &self.config
    }

    /// See [`slice::extract_loudest_slice`].
    pub fn extract_loudest_slice(&self, signal: &AudioSignal, duration_ms: u32) -> Vec<f32> {
        slice::extract_loudest_slice(signal, duration_ms)
    }

    pub fn quantize_to_int16(&self, samples: &[f32]) -> Vec<i16> {
        slice::quantize_to_int16(samples)
    }

    /// Recursive radix-2 FFT of a real input.
    ///
    /// # Errors
    /// `InvalidFftLength` unless the length is a non-zero power of two.
    pub fn fft(&self, real: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        fft::fft(real)
    }

    /// Hann-windowed power spectrogram using the configured window and hop.
    pub fn stft(&self, signal: &AudioSignal) -> SpectrogramData {
        spectrogram::stft(signal, self.config.window_size, self.config.hop_size)
    }

    pub fn to_decibel_spectrogram(&self, power: &SpectrogramData) -> SpectrogramData {
        spectrogram::to_decibel(power)
    }

    /// Quantized filterbank for the configured band limits and scale bits.
    pub fn build_mel_filterbank(
        &self,
        num_filters: usize,
        num_bins: usize,
        sample_rate: u32,
    ) -> Result<FilterBank> {
        FilterBank::new(&FilterBankParams {
            num_filters,
            num_bins,
            sample_rate,
            lower_band_hz: self.config.lower_band_hz,
            upper_band_hz: self.config.upper_band_hz,
            filterbank_bits: self.config.filterbank_bits,
        })
    }

    /// `[num_frames][num_coefficients]` log mel spectrogram.
    ///
    /// Signals shorter than one window produce all-zero rows.
    pub fn compute_mel_spectrogram(&self, signal: &AudioSignal) -> Result<MelSpectrogram> {
        let power = self.stft(signal);
        let bank = self.build_mel_filterbank(
            self.config.num_coefficients,
            self.config.num_bins(),
            signal.sample_rate(),
        )?;
        debug!(
            frames = power.num_frames(),
            start = bank.start_index(),
            end = bank.end_index(),
            "mel spectrogram"
        );
        Ok(mel::compute(
            &power,
            &bank,
            self.config.log_scale_shift,
            self.config.num_frames,
        ))
    }

    /// MFCCs over a float triangular filterbank of `num_filters` bands.
    pub fn compute_mfcc(&self, signal: &AudioSignal, num_filters: usize) -> Result<MfccData> {
        if num_filters == 0 {
            return Err(ChirpError::InvalidConfig(
                "MFCC needs at least one filter".into(),
            ));
        }
        let power = self.stft(signal);
        let filters = mfcc::triangular_filters(
            num_filters,
            self.config.window_size,
            signal.sample_rate(),
            self.config.lower_band_hz,
            self.config.upper_band_hz,
        );
        Ok(mfcc::compute(&power, &filters, self.config.num_coefficients))
    }

    /// See [`slice::normalize`]; the centering uses the standard deviation.
    pub fn normalize(&self, samples: &[f32], mean: Option<f32>, std: Option<f32>) -> Vec<f32> {
        slice::normalize(samples, mean, std)
    }
}

impl Default for DspEngine {
    fn default() -> Self {
        Self {
            config: DspConfig::default(),
        }
    }
}
