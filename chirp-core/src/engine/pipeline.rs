//! Pipeline stages, run guard and diagnostics counters.
//!
//! ```text
//! AudioSignal (any rate)
//!   └─► resample(target) ─► loudest slice ─┬─► STFT ─► dB spectrogram   (display)
//!                                          └─► int16 ─► mel [55×40]     (classifier)
//! ```
//!
//! Every stage here is synchronous and CPU-bound; `ChirpPipeline` runs them
//! on the blocking pool and checks the [`RunGuard`] between them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::audio::{resample, AudioSignal};
use crate::dsp::{DspEngine, MelSpectrogram, SpectrogramData};
use crate::error::{ChirpError, Result};

/// Shared pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub runs_started: AtomicUsize,
    pub runs_completed: AtomicUsize,
    pub runs_superseded: AtomicUsize,
    pub runs_failed: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub inference_calls: AtomicUsize,
    /// Inference calls answered by the mock because no model was loaded.
    pub mock_inferences: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
        self.runs_superseded.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.inference_calls.store(0, Ordering::Relaxed);
        self.mock_inferences.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_superseded: self.runs_superseded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            mock_inferences: self.mock_inferences.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub runs_started: usize,
    pub runs_completed: usize,
    pub runs_superseded: usize,
    pub runs_failed: usize,
    pub samples_in: usize,
    pub samples_resampled: usize,
    pub inference_calls: usize,
    pub mock_inferences: usize,
}

/// Ties a run to the generation it was started with.
#[derive(Debug, Clone)]
pub struct RunGuard {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl RunGuard {
    pub(crate) fn new(generation: u64, current: Arc<AtomicU64>) -> Self {
        Self {
            generation,
            current,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    /// `Superseded` once a newer run (or a clear) has started.
    pub fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(ChirpError::Superseded {
                generation: self.generation,
            })
        }
    }
}

/// Features extracted from one clip.
#[derive(Debug, Clone)]
pub struct DspOutput {
    /// dB spectrogram of the loudest slice.
    pub spectrogram: SpectrogramData,
    /// Log mel spectrogram of the int16-scaled slice.
    pub mel: MelSpectrogram,
}

/// Bring a decoded signal to the analysis rate.
pub fn prepare_signal(signal: &AudioSignal, target_rate: u32) -> Result<AudioSignal> {
    let started = Instant::now();
    let out = resample(signal, target_rate)?;
    debug!(
        from = signal.sample_rate(),
        to = out.sample_rate(),
        samples = out.len(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "audio stage"
    );
    Ok(out)
}

/// Slice, quantize and extract features from a signal already at the
/// analysis rate.
///
/// The mel stage sees the int16 sample values as floats (±32767 full
/// scale); the display spectrogram is computed from the float slice.
pub fn run_dsp(dsp: &DspEngine, signal: &AudioSignal) -> Result<DspOutput> {
    let started = Instant::now();
    let sample_rate = signal.sample_rate();

    let slice = dsp.extract_loudest_slice(signal, dsp.config().slice_ms);
    let quantized = dsp.quantize_to_int16(&slice);

    let slice_signal = AudioSignal::new(slice, sample_rate, 1);
    let spectrogram = dsp.to_decibel_spectrogram(&dsp.stft(&slice_signal));

    let scaled = AudioSignal::new(
        quantized.iter().map(|&s| f32::from(s)).collect(),
        sample_rate,
        1,
    );
    let mel = dsp.compute_mel_spectrogram(&scaled)?;

    debug!(
        slice_samples = scaled.len(),
        spectrogram_frames = spectrogram.num_frames(),
        mel_shape = ?mel.shape(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dsp stage"
    );
    Ok(DspOutput { spectrogram, mel })
}
