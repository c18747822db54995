//! Time-domain conditioning ahead of the spectral stages.

use crate::audio::AudioSignal;

/// Number of samples covering `duration_ms` at `sample_rate`.
pub(crate) fn slice_len(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as f64 / 1000.0 * sample_rate as f64).round() as usize
}

/// Window of `round(duration_ms / 1000 · sample_rate)` samples centered on
/// the first sample with the largest absolute value.
///
/// The window is shifted rather than clipped at either edge, so it always
/// holds real samples when the signal is long enough. Shorter signals are
/// returned whole and zero-padded at the end.
pub(crate) fn extract_loudest_slice(signal: &AudioSignal, duration_ms: u32) -> Vec<f32> {
    let data = signal.data();
    let len = slice_len(duration_ms, signal.sample_rate());

    if data.len() <= len {
        let mut out = data.to_vec();
        out.resize(len, 0.0);
        return out;
    }

    let peak = data
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |(best, best_abs), (i, &x)| {
            if x.abs() > best_abs {
                (i, x.abs())
            } else {
                (best, best_abs)
            }
        })
        .0;

    let start = peak.saturating_sub(len / 2).min(data.len() - len);
    data[start..start + len].to_vec()
}

/// Clamp to `[-1, 1]`, scale by `i16::MAX` and round with `floor(x + 0.5)`,
/// the same rule the filterbank weights use.
pub(crate) fn quantize_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32 + 0.5).floor() as i16)
        .collect()
}

/// Standardize samples against the supplied (or computed) statistics.
///
/// NOTE: this subtracts the standard deviation, not the mean:
/// `(x - std) / (std + 1e-8)`. Downstream consumers depend on the current
/// output, so the formula is left as is. `mean` only feeds the standard
/// deviation when `std` is not supplied.
pub(crate) fn normalize(samples: &[f32], mean: Option<f32>, std: Option<f32>) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f32;
    let mean = mean.unwrap_or_else(|| samples.iter().sum::<f32>() / n);
    let std = std.unwrap_or_else(|| {
        (samples.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / n).sqrt()
    });
    samples.iter().map(|&x| (x - std) / (std + 1e-8)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn signal(data: Vec<f32>, sample_rate: u32) -> AudioSignal {
        AudioSignal::new(data, sample_rate, 1)
    }

    #[test]
    fn slice_is_centered_on_peak() {
        let mut data = vec![0.0f32; 1000];
        data[500] = 1.0;
        let out = extract_loudest_slice(&signal(data, 1000), 100);
        assert_eq!(out.len(), 100);
        assert_eq!(out[50], 1.0);
    }

    #[test]
    fn slice_shifts_at_the_edges() {
        let mut data = vec![0.0f32; 1000];
        data[3] = -0.9;
        let out = extract_loudest_slice(&signal(data.clone(), 1000), 100);
        assert_eq!(out.len(), 100);
        assert_eq!(out[3], -0.9);

        data[3] = 0.0;
        data[998] = 0.9;
        let out = extract_loudest_slice(&signal(data, 1000), 100);
        assert_eq!(out.len(), 100);
        assert_eq!(out[98], 0.9);
    }

    #[test]
    fn slice_uses_first_maximum() {
        let mut data = vec![0.0f32; 1000];
        data[200] = 0.5;
        data[800] = -0.5;
        let out = extract_loudest_slice(&signal(data, 1000), 100);
        assert_eq!(out[50], 0.5);
        assert!(out.iter().filter(|x| **x != 0.0).count() == 1);
    }

    #[test]
    fn short_signal_is_zero_padded() {
        let out = extract_loudest_slice(&signal(vec![0.25; 10], 1000), 20);
        assert_eq!(out.len(), 20);
        assert!(out[..10].iter().all(|&x| x == 0.25));
        assert!(out[10..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn slice_len_rounds() {
        assert_eq!(slice_len(2000, 16_000), 32_000);
        assert_eq!(slice_len(2000, 44_100), 88_200);
        assert_eq!(slice_len(1, 22_050), 22);
        assert_eq!(slice_len(0, 16_000), 0);
    }

    #[test]
    fn quantize_clamps_and_rounds() {
        let out = quantize_to_int16(&[-2.0, -1.0, 0.0, 0.5, 1.0, 3.0]);
        assert_eq!(out, vec![-32767, -32767, 0, 16384, 32767, 32767]);
    }

    #[test]
    fn quantize_rounds_half_steps_toward_positive_infinity() {
        let ties = [-1.5f32, -2.5, -3.5, 1.5, 2.5].map(|t| t / i16::MAX as f32);
        assert_eq!(quantize_to_int16(&ties), vec![-1, -2, -3, 2, 3]);
    }

    #[test]
    fn quantize_is_monotonic() {
        let input: Vec<f32> = (-200..=200).map(|i| i as f32 / 100.0).collect();
        let out = quantize_to_int16(&input);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
        assert!(out.iter().all(|&v| (-32767..=32767).contains(&v)));
    }

    #[test]
    fn normalize_subtracts_std() {
        // mean 2.5, population std sqrt(1.25)
        let samples = [1.0f32, 2.0, 3.0, 4.0];
        let std = 1.25f32.sqrt();
        let out = normalize(&samples, None, None);
        for (o, x) in out.iter().zip(samples) {
            assert_relative_eq!(*o, (x - std) / (std + 1e-8), epsilon = 1e-6);
        }
    }

    #[test]
    fn normalize_with_supplied_stats() {
        let out = normalize(&[3.0, 5.0], Some(100.0), Some(1.0));
        assert_relative_eq!(out[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 4.0, epsilon = 1e-6);
        assert!(normalize(&[], None, None).is_empty());
    }
}
