use thiserror::Error;

/// All errors produced by chirp-core.
///
/// Only `Decode` and `Permission` are meant to reach the user as failures.
/// `ModelLoad` and `InferenceRuntime` are produced internally by the
/// inference engine, logged, and replaced with the mock distribution.
#[derive(Debug, Error)]
pub enum ChirpError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("microphone permission denied: {0}")]
    Permission(String),

    #[error("failed to load model '{variant}': {reason}")]
    ModelLoad { variant: String, reason: String },

    #[error("inference runtime error: {0}")]
    InferenceRuntime(String),

    #[error("FFT length must be a non-zero power of two, got {0}")]
    InvalidFftLength(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("microphone is already recording")]
    AlreadyRecording,

    #[error("microphone is not recording")]
    NotRecording,

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("run {generation} was superseded by a newer run")]
    Superseded { generation: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChirpError>;
