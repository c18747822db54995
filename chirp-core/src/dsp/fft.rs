//! Recursive radix-2 Cooley–Tukey FFT.
//!
//! The length must be a non-zero power of two. The analysis window of the
//! pipeline is fixed to 4096 so this always holds for internal callers;
//! [`fft`] rejects anything else instead of reinterpreting the size.

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use crate::error::{ChirpError, Result};

/// Forward DFT of a real signal.
///
/// Returns `(real, imag)`, each of the input length.
///
/// # Errors
/// `ChirpError::InvalidFftLength` if `real.len()` is not a non-zero power of two.
pub fn fft(real: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    if !real.len().is_power_of_two() {
        return Err(ChirpError::InvalidFftLength(real.len()));
    }
    let input: Vec<Complex64> = real.iter().map(|&r| Complex64::new(r, 0.0)).collect();
    let spectrum = fft_recursive(&input);
    Ok(spectrum.iter().map(|c| (c.re, c.im)).unzip())
}

/// Squared magnitude of bins `0..=n/2` of a real frame.
///
/// Caller guarantees a power-of-two frame length.
pub(crate) fn power_spectrum(frame: &[f64]) -> Vec<f64> {
    debug_assert!(frame.len().is_power_of_two());
    let input: Vec<Complex64> = frame.iter().map(|&r| Complex64::new(r, 0.0)).collect();
    let spectrum = fft_recursive(&input);
    spectrum[..=frame.len() / 2]
        .iter()
        .map(|c| c.norm_sqr())
        .collect()
}

fn fft_recursive(x: &[Complex64]) -> Vec<Complex64> {
    let n = x.len();
    if n == 1 {
        return vec![x[0]];
    }

    let even: Vec<Complex64> = x.iter().step_by(2).copied().collect();
    let odd: Vec<Complex64> = x.iter().skip(1).step_by(2).copied().collect();
    let even = fft_recursive(&even);
    let odd = fft_recursive(&odd);

    let half = n / 2;
    let mut out = vec![Complex64::new(0.0, 0.0); n];
    for k in 0..half {
        let twiddle = Complex64::from_polar(1.0, -2.0 * PI * k as f64 / n as f64) * odd[k];
        out[k] = even[k] + twiddle;
        out[k + half] = even[k] - twiddle;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rustfft::FftPlanner;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(fft(&[0.0; 12]), Err(ChirpError::InvalidFftLength(12))));
        assert!(matches!(fft(&[]), Err(ChirpError::InvalidFftLength(0))));
    }

    #[test]
    fn single_sample_is_identity() {
        let (re, im) = fft(&[3.5]).unwrap();
        assert_eq!(re, vec![3.5]);
        assert_eq!(im, vec![0.0]);
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut x = vec![0.0; 8];
        x[0] = 1.0;
        let (re, im) = fft(&x).unwrap();
        for k in 0..8 {
            assert_relative_eq!(re[k], 1.0, epsilon = 1e-12);
            assert_relative_eq!(im[k], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn matches_rustfft_reference() {
        let n = 256;
        let x: Vec<f64> = (0..n)
            .map(|i| (i as f64 * 0.37).sin() + 0.25 * (i as f64 * 1.9).cos())
            .collect();

        let (re, im) = fft(&x).unwrap();

        let mut reference: Vec<Complex64> = x.iter().map(|&r| Complex64::new(r, 0.0)).collect();
        FftPlanner::<f64>::new()
            .plan_fft_forward(n)
            .process(&mut reference);

        for k in 0..n {
            assert_relative_eq!(re[k], reference[k].re, epsilon = 1e-9);
            assert_relative_eq!(im[k], reference[k].im, epsilon = 1e-9);
        }
    }

    #[test]
    fn power_spectrum_has_half_plus_one_bins() {
        let frame = vec![0.5; 64];
        let power = power_spectrum(&frame);
        assert_eq!(power.len(), 33);
        // DC of a constant 0.5 frame of length 64: (0.5 * 64)^2
        assert_relative_eq!(power[0], 1024.0, epsilon = 1e-9);
        assert!(power[1..].iter().all(|&p| p < 1e-18));
    }
}
