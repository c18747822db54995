//! Sample-rate conversion by linear interpolation.
//!
//! Decoded files arrive at whatever rate they were recorded at (44.1 kHz,
//! 48 kHz, ...) and the classifier front end runs at 16 kHz. `resample`
//! bridges that gap on the blocking pool.
//!
//! This is a lossy, non band-limited converter: good enough for feature
//! extraction, not for listening.

use tracing::debug;

use super::AudioSignal;
use crate::error::{ChirpError, Result};

/// Convert `signal` to `target_rate`.
///
/// Returns an identical copy when the rates already match. Otherwise the
/// output holds `round(len * target / source)` samples, each linearly
/// interpolated between the two nearest input samples.
///
/// # Errors
/// `ChirpError::InvalidConfig` when `target_rate` is zero.
pub fn resample(signal: &AudioSignal, target_rate: u32) -> Result<AudioSignal> {
    if target_rate == 0 {
        return Err(ChirpError::InvalidConfig(
            "resample target rate must be positive".into(),
        ));
    }
    let source_rate = signal.sample_rate();
    if source_rate == target_rate {
        return Ok(signal.clone());
    }

    let input = signal.data();
    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;

    let output = if input.is_empty() {
        Vec::new()
    } else {
        let last = input.len() - 1;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let i0 = (pos.floor() as usize).min(last);
                let i1 = (i0 + 1).min(last);
                let frac = (pos - i0 as f64) as f32;
                input[i0] + (input[i1] - input[i0]) * frac
            })
            .collect()
    };

    debug!(
        source_rate,
        target_rate,
        in_len = input.len(),
        out_len = output.len(),
        "resampled signal"
    );

    Ok(AudioSignal::new(output, target_rate, signal.channels()))
}
