//! Audio ingestion: container decode, resampling and microphone capture.
//!
//! Every entry point produces an [`AudioSignal`], the immutable mono sample
//! buffer consumed by the DSP engine. Only channel 0 of multi-channel input
//! is kept; `channels` records what the source had.

pub mod decode;
pub mod device;
pub mod microphone;
pub mod resample;

pub use decode::{decode_bytes, decode_file};
pub use microphone::{CaptureBackend, CaptureStream, Microphone};
pub use resample::resample;

#[cfg(feature = "audio-cpal")]
pub use microphone::CpalBackend;

/// Mono f32 samples at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    sample_rate: u32,
    channels: u16,
    data: Vec<f32>,
    duration: f64,
}

impl AudioSignal {
    /// Build a signal from channel-0 samples. `channels` is the channel count
    /// of the source the samples were taken from.
    pub fn new(data: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        debug_assert!(sample_rate > 0, "sample rate must be positive");
        let duration = if sample_rate == 0 {
            0.0
        } else {
            data.len() as f64 / sample_rate as f64
        };
        Self {
            sample_rate,
            channels: channels.max(1),
            data,
            duration,
        }
    }

    /// Shorthand for a single-channel source.
    pub fn mono(data: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(data, sample_rate, 1)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
