//! Progress and result types emitted by the pipeline.
//!
//! | Type | Delivered via |
//! |------|---------------|
//! | `ProgressEvent` | `ChirpPipeline::subscribe_progress` (broadcast) |
//! | `ClassificationResult` | `PipelineOutput::results` / `InferenceEngine::infer` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Classification results
// ---------------------------------------------------------------------------

/// One ranked class produced by the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Class label from the active model's label list.
    pub species: String,
    /// Probability in [0.0, 1.0].
    pub confidence: f32,
    /// Wall-clock time of the forward pass (or mock) in milliseconds.
    pub inference_time_ms: f64,
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// Emitted for every stage transition of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Run that produced this event. Consumers should ignore events whose
    /// generation is older than the newest one they have seen.
    pub generation: u64,
    pub stage: ProgressStage,
    /// Overall completion in [0, 100].
    pub percent: u8,
    /// Human-readable description of the current step.
    pub message: String,
}

impl ProgressEvent {
    pub fn new(generation: u64, stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            generation,
            stage,
            percent: stage.percent(),
            message: message.into(),
        }
    }
}

/// Pipeline stage reported to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    /// Nothing running.
    Idle,
    /// Model weights are being loaded.
    Loading,
    /// Decoding and resampling the input.
    Audio,
    /// Slice, quantize, STFT, mel filterbank.
    Dsp,
    /// Forward pass (or mock fallback).
    Inference,
    /// Results committed.
    Complete,
    /// The run failed (decode / permission errors only).
    Error,
}

impl ProgressStage {
    /// Nominal completion percentage for this stage.
    pub fn percent(self) -> u8 {
        match self {
            ProgressStage::Idle => 0,
            ProgressStage::Loading => 10,
            ProgressStage::Audio => 25,
            ProgressStage::Dsp => 50,
            ProgressStage::Inference => 80,
            ProgressStage::Complete => 100,
            ProgressStage::Error => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_result_serializes_with_camel_case() {
        let result = ClassificationResult {
            species: "Eurasian Wren".into(),
            confidence: 0.83,
            inference_time_ms: 4.5,
        };

        let json = serde_json::to_value(&result).expect("serialize result");
        assert_eq!(json["species"], "Eurasian Wren");
        assert_eq!(json["inferenceTimeMs"], 4.5);
        let conf = json["confidence"]
            .as_f64()
            .expect("confidence should serialize as number");
        assert!((conf - 0.83).abs() < 1e-5);
    }

    #[test]
    fn progress_event_serializes_with_lowercase_stage() {
        let event = ProgressEvent::new(3, ProgressStage::Inference, "running model");

        let json = serde_json::to_value(&event).expect("serialize progress event");
        assert_eq!(json["generation"], 3);
        assert_eq!(json["stage"], "inference");
        assert_eq!(json["percent"], 80);
        assert_eq!(json["message"], "running model");

        let round_trip: ProgressEvent =
            serde_json::from_value(json).expect("deserialize progress event");
        assert_eq!(round_trip.stage, ProgressStage::Inference);
    }

    #[test]
    fn progress_stage_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<ProgressStage>(r#""Complete""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn stage_percentages_are_monotonic_through_a_successful_run() {
        let order = [
            ProgressStage::Idle,
            ProgressStage::Loading,
            ProgressStage::Audio,
            ProgressStage::Dsp,
            ProgressStage::Inference,
            ProgressStage::Complete,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].percent() < pair[1].percent());
        }
    }
}
