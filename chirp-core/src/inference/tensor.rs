//! Model input layout.

use ndarray::Array4;

use crate::dsp::MelSpectrogram;
use crate::error::{ChirpError, Result};

/// `[batch, height, width, channel]` input built from a mel spectrogram:
/// batch 1, one row per frame, one column per band, a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor(Array4<f32>);

impl InputTensor {
    pub fn from_mel(mel: &MelSpectrogram) -> Result<Self> {
        let (frames, bands) = mel.shape();
        Array4::from_shape_vec((1, frames, bands, 1), mel.flatten())
            .map(Self)
            .map_err(|e| ChirpError::InferenceRuntime(e.to_string()))
    }

    pub fn shape(&self) -> [usize; 4] {
        let dim = self.0.dim();
        [dim.0, dim.1, dim.2, dim.3]
    }

    pub fn array(&self) -> &Array4<f32> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_frame_major() {
        let rows: Vec<Vec<f32>> = (0..55)
            .map(|f| (0..40).map(|b| (f * 100 + b) as f32).collect())
            .collect();
        let mel = MelSpectrogram::from_rows(rows, 55, 40);
        let tensor = InputTensor::from_mel(&mel).unwrap();

        assert_eq!(tensor.shape(), [1, 55, 40, 1]);
        assert_eq!(tensor.array()[[0, 3, 7, 0]], 307.0);
        assert_eq!(tensor.array()[[0, 54, 39, 0]], 5439.0);
    }
}
