//! # chirp-core
//!
//! Bird-call classification SDK.
//!
//! ## Architecture
//!
//! ```text
//! file bytes ─► decode_bytes ─┐
//!                             ├─► resample(16 kHz) ─► DspEngine ─────────────► InferenceEngine
//! Microphone ─► stop_recording┘    loudest 2 s slice → int16 → STFT → mel [55×40]   ranked results
//!                                                                          │
//!                                            broadcast::Sender<ProgressEvent>
//! ```
//!
//! DSP and inference are CPU-bound and run on the blocking pool. Every run
//! carries a generation token so a superseded run can never overwrite the
//! output of a newer one.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use audio::{decode_bytes, decode_file, resample, AudioSignal, Microphone};
pub use config::PipelineConfig;
pub use dsp::{DspConfig, DspEngine, MelSpectrogram, SpectrogramData};
pub use engine::{ChirpPipeline, PipelineOutput};
pub use error::{ChirpError, Result};
pub use inference::{
    BirdClassifier, EngineHandle, InferenceEngine, ModelConfig, ModelLoader, ModelState,
    ModelVariant,
};
pub use ipc::events::{ClassificationResult, ProgressEvent, ProgressStage};

#[cfg(feature = "onnx")]
pub use inference::{OnnxClassifier, OnnxLoader};
